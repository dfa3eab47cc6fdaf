/// What went wrong while decoding a capture record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Record is shorter than the 16-byte source-address prefix
    RecordTooShort,
    /// TCP segment does not cover the fixed header fields
    SegmentTooShort,
    /// Data offset points past the end of the segment
    OffsetOutOfBounds,
    /// Segment carries no payload bytes after the TCP header
    EmptyPayload,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::RecordTooShort => "record shorter than the source-address prefix",
            Self::SegmentTooShort => "TCP segment shorter than the fixed header",
            Self::OffsetOutOfBounds => "TCP data offset exceeds segment length",
            Self::EmptyPayload => "TCP segment has no payload",
        };
        f.write_str(msg)
    }
}

/// Error decoding a capture record into a [`TcpPacket`](crate::TcpPacket).
///
/// Truncated records are routine on a passive tap (snaplen cuts, mangled
/// frames); callers are expected to drop the record and continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseError {
    /// What went wrong
    pub kind: ParseErrorKind,
    /// Total record length that failed to decode
    pub len: usize,
}

impl ParseError {
    /// Create an error for a record of the given length.
    pub fn new(kind: ParseErrorKind, len: usize) -> Self {
        Self { kind, len }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} bytes)", self.kind, self.len)
    }
}

impl std::error::Error for ParseError {}

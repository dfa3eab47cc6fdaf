use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Instant;

use bytes::{Bytes, BytesMut};

use crate::error::{ParseError, ParseErrorKind};

/// Length of the source-address prefix on a capture record.
pub const RECORD_ADDR_LEN: usize = 16;

/// Shortest TCP segment we accept: ports, seq, ack, data offset and flags.
const MIN_SEGMENT_LEN: usize = 14;

/// `Expect: 100-continue` marker as it appears in the header block.
const EXPECT_CONTINUE: &[u8] = b"Expect: 100-continue";

/// Window at the payload tail holding the marker plus two CRLFs.
const EXPECT_WINDOW: usize = EXPECT_CONTINUE.len() + 4;

/// Identity of one direction of one HTTP exchange.
///
/// Client-to-server segments of a single request share an acknowledgement
/// number, so `(ack, ports)` names the request; the matching response is
/// predictable from the request alone by swapping the ports and using the
/// request's projected response ack. Source addresses are deliberately not
/// part of the key — they are compared separately where an ack collision
/// across hosts could matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    /// Acknowledgement number carried by every segment of the message
    pub ack: u32,
    /// Sending side's port
    pub src_port: u16,
    /// Receiving side's port
    pub dst_port: u16,
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}#{}", self.src_port, self.dst_port, self.ack)
    }
}

/// One captured TCP segment.
///
/// Immutable except for two reassembly fix-ups reserved for the engine:
/// [`set_ack`](Self::set_ack) collapses the second ack of a 100-continue
/// pair onto the first, and [`strip_expect_continue`](Self::strip_expect_continue)
/// splices the `Expect` header line out of the payload.
#[derive(Debug, Clone)]
pub struct TcpPacket {
    /// Source IP of the segment
    pub addr: IpAddr,
    /// TCP source port
    pub src_port: u16,
    /// TCP destination port
    pub dst_port: u16,
    /// Sequence number
    pub seq: u32,
    /// TCP flag bits (byte 13 of the header)
    pub flags: u8,
    /// When the capture backend saw this segment
    pub arrived_at: Instant,
    ack: u32,
    payload: Bytes,
    /// Bytes spliced out of the payload; keeps sequence arithmetic honest
    trimmed: u32,
}

impl TcpPacket {
    /// Current acknowledgement number, after any alias rewrite.
    pub fn ack(&self) -> u32 {
        self.ack
    }

    /// Rewrite the acknowledgement number. Reassembly fix-up only: this
    /// changes [`id`](Self::id) and with it which message the packet
    /// belongs to.
    pub fn set_ack(&mut self, ack: u32) {
        self.ack = ack;
    }

    /// Payload bytes after the TCP header (never empty).
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Connection key of this segment, derived from the current ack.
    pub fn id(&self) -> ConnectionId {
        ConnectionId {
            ack: self.ack,
            src_port: self.src_port,
            dst_port: self.dst_port,
        }
    }

    /// Sequence number one past the last byte this segment occupied on the
    /// wire. Spliced-out bytes still count: the peer acknowledges what was
    /// sent, not what we kept.
    pub fn seq_end(&self) -> u32 {
        self.seq
            .wrapping_add(self.payload.len() as u32)
            .wrapping_add(self.trimmed)
    }

    /// True for a POST whose header block ends with the literal
    /// `Expect: 100-continue\r\n\r\n`. The body of such a request arrives
    /// as a separate segment with its own ack number.
    ///
    /// This is the capture-format rule: a fixed-position suffix match, not
    /// a header scan. Clients that place or case the header differently are
    /// not merged.
    pub fn has_expect_continue(&self) -> bool {
        let data = self.payload.as_ref();
        data.len() >= EXPECT_WINDOW
            && data.starts_with(b"POST")
            && &data[data.len() - EXPECT_WINDOW..data.len() - 4] == EXPECT_CONTINUE
    }

    /// Splice the `Expect: 100-continue\r\n` line out of the payload,
    /// preserving the final CRLF that terminates the header block. Only
    /// meaningful right after [`has_expect_continue`](Self::has_expect_continue)
    /// returned true; otherwise a no-op.
    pub fn strip_expect_continue(&mut self) {
        if !self.has_expect_continue() {
            return;
        }
        let data = self.payload.as_ref();
        let line_start = data.len() - EXPECT_WINDOW;
        let line_end = data.len() - 2;
        let mut spliced = BytesMut::with_capacity(data.len() - (line_end - line_start));
        spliced.extend_from_slice(&data[..line_start]);
        spliced.extend_from_slice(&data[line_end..]);
        self.trimmed += (line_end - line_start) as u32;
        self.payload = spliced.freeze();
    }
}

/// Decode one capture record: `[16 bytes source IP][raw TCP segment]`.
///
/// The backend has already stripped link-layer framing and the IP header.
/// IPv4 addresses occupy the first four bytes of the prefix with a zero
/// tail; IPv6 addresses use all sixteen.
///
/// Rejects records that do not cover the fixed TCP header fields, whose
/// data offset walks off the segment, or that carry no payload — a passive
/// tap has no use for bare ACKs.
pub fn parse_record(raw: &[u8], arrived_at: Instant) -> Result<TcpPacket, ParseError> {
    if raw.len() < RECORD_ADDR_LEN {
        return Err(ParseError::new(ParseErrorKind::RecordTooShort, raw.len()));
    }
    let addr = parse_addr(&raw[..RECORD_ADDR_LEN]);

    let seg = &raw[RECORD_ADDR_LEN..];
    if seg.len() < MIN_SEGMENT_LEN {
        return Err(ParseError::new(ParseErrorKind::SegmentTooShort, raw.len()));
    }

    let src_port = u16::from_be_bytes([seg[0], seg[1]]);
    let dst_port = u16::from_be_bytes([seg[2], seg[3]]);
    let seq = u32::from_be_bytes([seg[4], seg[5], seg[6], seg[7]]);
    let ack = u32::from_be_bytes([seg[8], seg[9], seg[10], seg[11]]);
    let header_len = ((seg[12] & 0xF0) >> 4) as usize * 4;
    let flags = seg[13];

    if header_len > seg.len() {
        return Err(ParseError::new(ParseErrorKind::OffsetOutOfBounds, raw.len()));
    }
    if header_len == seg.len() {
        return Err(ParseError::new(ParseErrorKind::EmptyPayload, raw.len()));
    }

    Ok(TcpPacket {
        addr,
        src_port,
        dst_port,
        seq,
        ack,
        flags,
        arrived_at,
        payload: Bytes::copy_from_slice(&seg[header_len..]),
        trimmed: 0,
    })
}

fn parse_addr(prefix: &[u8]) -> IpAddr {
    if prefix[4..].iter().all(|&b| b == 0) {
        let mut v4 = [0u8; 4];
        v4.copy_from_slice(&prefix[..4]);
        IpAddr::V4(Ipv4Addr::from(v4))
    } else {
        let mut v6 = [0u8; 16];
        v6.copy_from_slice(prefix);
        IpAddr::V6(Ipv6Addr::from(v6))
    }
}

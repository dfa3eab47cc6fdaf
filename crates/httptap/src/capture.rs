//! Capture backends.
//!
//! Both backends produce the same record format — 16 bytes of source IP
//! (IPv4 zero-padded) followed by the raw TCP segment — and push it onto
//! the listener's inbound queue with `try_send`: under overload the
//! record is dropped, never the kernel blocked.
//!
//! Each capture loop runs on a plain blocking thread with a read timeout,
//! checking the shutdown flag every tick; nothing closes handles across
//! threads.

pub(crate) mod pcap;
pub(crate) mod raw_socket;

use std::net::IpAddr;

use tcpsession::RECORD_ADDR_LEN;

/// Shortest TCP segment worth forwarding: ports, seq, ack, offset, flags.
const MIN_SEGMENT_LEN: usize = 14;

/// Capture buffer and pcap snaplen.
const SNAPLEN: usize = 64 * 1024;

/// User-space port filter for backends that cannot filter in the kernel.
///
/// Keeps segments addressed to the tapped port (or coming from it, when
/// responses are tracked) that carry at least one payload byte.
pub(crate) fn wants_segment(segment: &[u8], port: u16, track_response: bool) -> bool {
    if segment.len() < MIN_SEGMENT_LEN {
        return false;
    }
    let src_port = u16::from_be_bytes([segment[0], segment[1]]);
    let dst_port = u16::from_be_bytes([segment[2], segment[3]]);
    if dst_port != port && !(track_response && src_port == port) {
        return false;
    }
    let header_len = ((segment[12] & 0xF0) >> 4) as usize * 4;
    segment.len() > header_len
}

/// Frame a segment as an inbound record: `[16 B src IP][segment]`.
pub(crate) fn build_record(src: IpAddr, segment: &[u8]) -> Vec<u8> {
    let mut record = vec![0u8; RECORD_ADDR_LEN];
    match src {
        IpAddr::V4(ip) => record[..4].copy_from_slice(&ip.octets()),
        IpAddr::V6(ip) => record.copy_from_slice(&ip.octets()),
    }
    record.extend_from_slice(segment);
    record
}

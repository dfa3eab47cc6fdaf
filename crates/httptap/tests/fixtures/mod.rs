#![allow(dead_code)]
//! Raw capture-record builders for listener tests.
//!
//! Records are exactly what a capture backend would enqueue: 16 bytes of
//! source IP followed by a TCP segment with a 20-byte header.

/// TCP flag bits used by the builders.
pub const PSH_ACK: u8 = 0x18;

/// Build a raw TCP segment with no options.
pub fn build_segment(src_port: u16, dst_port: u16, seq: u32, ack: u32, payload: &[u8]) -> Vec<u8> {
    let mut seg = vec![0u8; 20];
    seg[0..2].copy_from_slice(&src_port.to_be_bytes());
    seg[2..4].copy_from_slice(&dst_port.to_be_bytes());
    seg[4..8].copy_from_slice(&seq.to_be_bytes());
    seg[8..12].copy_from_slice(&ack.to_be_bytes());
    seg[12] = 5 << 4;
    seg[13] = PSH_ACK;
    seg.extend_from_slice(payload);
    seg
}

/// Frame a segment as a capture record with an IPv4 source.
pub fn build_record(
    src: [u8; 4],
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    payload: &[u8],
) -> Vec<u8> {
    let mut record = vec![0u8; 16];
    record[..4].copy_from_slice(&src);
    record.extend(build_segment(src_port, dst_port, seq, ack, payload));
    record
}

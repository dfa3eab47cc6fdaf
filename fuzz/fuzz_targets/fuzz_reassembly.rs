//! Fuzz target: structured segment streams
//!
//! Generates semi-valid TCP segments with the Arbitrary trait and runs
//! them through the reassembly engine. Structurally valid inputs with
//! random field values are far better at reaching the 100-continue merge
//! and pairing paths than raw bytes.

#![no_main]

use std::time::{Duration, Instant};

use arbitrary::Arbitrary;
use httptap::Reassembler;
use libfuzzer_sys::fuzz_target;
use tcpsession::parse_record;

const PORT: u16 = 80;

#[derive(Debug, Arbitrary)]
struct FuzzSegment {
    /// Toward the tapped port or away from it
    incoming: bool,
    /// Reuse a handful of seq/ack values so segments collide into the
    /// same messages instead of scattering
    seq_slot: u8,
    ack_slot: u8,
    payload: Vec<u8>,
    /// Sometimes dress the payload up as a 100-continue POST
    expect_continue: bool,
}

impl FuzzSegment {
    fn to_record(&self) -> Vec<u8> {
        let (src_port, dst_port) = if self.incoming {
            (40000, PORT)
        } else {
            (PORT, 40000)
        };
        let seq = 1000 + u32::from(self.seq_slot % 8) * 64;
        let ack = 500 + u32::from(self.ack_slot % 8) * 64;

        let mut payload = self.payload.clone();
        payload.truncate(256);
        if self.expect_continue {
            let mut dressed = b"POST / HTTP/1.1\r\n".to_vec();
            dressed.extend(&payload);
            dressed.extend(b"Expect: 100-continue\r\n\r\n");
            payload = dressed;
        }
        if payload.is_empty() {
            payload.push(b'.');
        }

        let mut record = vec![0u8; 16];
        record[..4].copy_from_slice(&[10, 0, 0, 2]);
        let mut seg = vec![0u8; 20];
        seg[0..2].copy_from_slice(&src_port.to_be_bytes());
        seg[2..4].copy_from_slice(&dst_port.to_be_bytes());
        seg[4..8].copy_from_slice(&seq.to_be_bytes());
        seg[8..12].copy_from_slice(&ack.to_be_bytes());
        seg[12] = 5 << 4;
        seg[13] = 0x18;
        seg.extend(&payload);
        record.extend(seg);
        record
    }
}

fuzz_target!(|segments: Vec<FuzzSegment>| {
    let start = Instant::now();
    let expire = Duration::from_millis(100);
    let mut engine = Reassembler::new(PORT, true, expire);

    for segment in segments.iter().take(64) {
        if let Ok(packet) = parse_record(&segment.to_record(), start) {
            let _ = engine.process(packet);
        }
    }

    // Everything left must be evictable without panics or residue.
    let _ = engine.sweep(start + expire * 2);
    assert!(engine.len() == 0, "sweep must evict every idle message");
});

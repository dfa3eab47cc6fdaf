//! Fuzz target: capture record parsing
//!
//! Feeds completely random bytes to the record parser. The goal is to
//! ensure the parser never panics on arbitrary input, and that packets it
//! does accept survive the reassembly fix-ups.

#![no_main]

use std::time::Instant;

use libfuzzer_sys::fuzz_target;
use tcpsession::{TcpMessage, parse_record};

fuzz_target!(|data: &[u8]| {
    let Ok(packet) = parse_record(data, Instant::now()) else {
        return;
    };

    // Exercise the derived values and the sanctioned mutations.
    let _ = packet.id();
    let _ = packet.seq_end();
    let _ = packet.has_expect_continue();

    let mut mutated = packet.clone();
    mutated.set_ack(packet.ack().wrapping_add(1));
    mutated.strip_expect_continue();

    // A single-packet message must never panic either.
    let mut message = TcpMessage::new(&packet, true);
    message.add(packet);
    message.update_response_ack();
    let _ = message.is_finished();
    let _ = message.bytes();
    let _ = message.to_request();
});

//! Fuzz target: HTTP/1.x completeness scanning and parsing
//!
//! Feeds random bytes to the completeness predicates and the typed
//! parsers. The goal is to ensure they never panic on arbitrary input.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tcpsession::http1;

fuzz_target!(|data: &[u8]| {
    let _ = http1::request_complete(data);
    let _ = http1::response_complete(data);
    let _ = http1::try_parse_request(data);
    let _ = http1::try_parse_response(data);
    let _ = http1::is_request(data);
    let _ = http1::is_response(data);

    // Prefixes exercise the incomplete paths.
    if data.len() > 10 {
        let half = &data[..data.len() / 2];
        let _ = http1::request_complete(half);
        let _ = http1::try_parse_response(half);
    }
});

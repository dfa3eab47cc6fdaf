#![warn(missing_docs)]
//! TCP segment records and message assembly state for passive HTTP traffic
//! capture.
//!
//! A passive tap never participates in the TCP handshake: all it sees is an
//! unordered stream of raw segments, 16 bytes of source address glued to a
//! TCP header. This crate holds the pure, I/O-free half of turning that
//! stream back into HTTP messages:
//!
//! - [`TcpPacket`] — one captured segment, parsed from a capture record via
//!   [`parse_record`], identified by its [`ConnectionId`].
//! - [`TcpMessage`] — the segments of one logical HTTP request or response,
//!   assembled in sequence-number order, with the HTTP/1.x completeness
//!   predicate [`TcpMessage::is_finished`].
//! - [`http1`] — header/body completeness scanning and typed
//!   [`HttpRequest`]/[`HttpResponse`] views over the raw bytes.
//!
//! The capture backends and the reassembly engine that drives these types
//! live in the `httptap` crate.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Instant;
//! use tcpsession::parse_record;
//!
//! # let record: Vec<u8> = vec![0; 64];
//! // [16 bytes source IP][raw TCP segment], as produced by a capture backend
//! let packet = parse_record(&record, Instant::now())?;
//! println!("{} -> {}", packet.src_port, packet.dst_port);
//! # Ok::<(), tcpsession::ParseError>(())
//! ```

mod error;
pub mod http1;
mod message;
mod packet;

#[cfg(test)]
mod tests;

pub use error::{ParseError, ParseErrorKind};
pub use http1::{HttpRequest, HttpResponse};
pub use message::TcpMessage;
pub use packet::{ConnectionId, RECORD_ADDR_LEN, TcpPacket, parse_record};

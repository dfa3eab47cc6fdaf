#![warn(missing_docs)]
//! Passive HTTP traffic tap.
//!
//! Captures raw TCP segments off a network interface — without joining
//! the TCP conversation: no ACKs sent, no ports held — and reassembles
//! them into complete HTTP request and response messages. The tapped
//! service never notices; the consumer gets semantic HTTP units for
//! replay, analysis or shadowing.
//!
//! # Pieces
//!
//! - [`Listener`] — the facade: owns the capture backend and the
//!   reassembly worker, hands out completed messages on a channel.
//! - [`Reassembler`] — the engine: demultiplexes segments into messages,
//!   merges `Expect: 100-continue` pairs, predicts and pairs responses,
//!   and expires what never completes. Usable directly when you already
//!   have capture records from elsewhere.
//! - [`Engine`] — raw IP socket or libpcap capture.
//!
//! The packet and message types come from the [`tcpsession`] crate and
//! are re-exported here.
//!
//! # Example
//!
//! ```no_run
//! use httptap::{Engine, Listener, ListenerConfig};
//!
//! # async fn run() -> httptap::Result<()> {
//! let mut listener = Listener::new(ListenerConfig {
//!     addr: "127.0.0.1".into(),
//!     port: 80,
//!     engine: Engine::RawSocket,
//!     track_response: true,
//!     ..Default::default()
//! })?;
//!
//! while let Some(message) = listener.recv().await {
//!     if message.is_incoming {
//!         println!("request: {:?}", message.to_request());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod capture;
mod error;
mod listener;
mod reassembler;


pub use error::{CaptureError, Result};
pub use listener::{Engine, Listener, ListenerConfig};
pub use reassembler::Reassembler;
pub use tcpsession::{ConnectionId, HttpRequest, HttpResponse, TcpMessage, TcpPacket};

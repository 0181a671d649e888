//! Byte-stream transport for the amp sync protocol.
//!
//! Provides a single stream type over the supported carriers:
//! - TCP (the host role listens on [`DEFAULT_PORT`])
//! - Local socket pairs (Unix only, for in-process peers and tests)
//!
//! This is the lowest layer of amp. Transaction framing in `amp-tx` builds
//! on top of the [`AmpStream`] type provided here.

pub mod error;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
pub use stream::AmpStream;
pub use tcp::TcpTransport;

/// Conventional rendezvous port for the host role.
pub const DEFAULT_PORT: u16 = 5192;

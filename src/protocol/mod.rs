//! Wire Envelope
//!
//! Length-prefixed framing for application requests and responses carried
//! on a single bidirectional stream.

mod header;
mod message;
pub mod segment;

use thiserror::Error;

pub use header::Header;
pub use message::{bytes_body, empty_body, Body, Request, Response};

/// Largest request name or header block accepted from a peer.
pub const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Errors from encoding or decoding envelopes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("field too large: {0} bytes")]
    TooLarge(usize),

    #[error("{what} of {size} bytes exceeds limit of {limit}")]
    Oversized {
        what: &'static str,
        size: usize,
        limit: usize,
    },

    #[error("truncated {what}: expected {expected} bytes, got {actual}")]
    Truncated {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

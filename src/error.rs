//! Fabric Error Kinds
//!
//! Error kinds shared by the node module, the node handles and the
//! transports, together with the conventional response codes.

use crate::protocol::ProtocolError;
use thiserror::Error;

/// Response code for success.
pub const CODE_OK: i32 = 0;

/// Response code when no handler produced a response.
pub const CODE_NOT_FOUND: i32 = 404;

/// Response code when a handler failed.
pub const CODE_INTERNAL_ERROR: i32 = 500;

/// Errors surfaced by fabric operations.
#[derive(Debug, Error)]
pub enum FabricError {
    #[error("not found")]
    NotFound,

    #[error("unavailable")]
    Unavailable,

    #[error("invalid node")]
    InvalidNode,

    #[error("node closed")]
    NodeClosed,

    #[error("timeout")]
    Timeout,

    #[error("conflict")]
    Conflict,

    #[error("refused")]
    Refused,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FabricError {
    /// Check if the error means the handle's connection is gone.
    pub fn is_node_closed(&self) -> bool {
        matches!(self, FabricError::NodeClosed)
    }

    /// Build an internal error from any displayable value.
    pub fn internal(msg: impl std::fmt::Display) -> Self {
        FabricError::Internal(msg.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for FabricError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        FabricError::Timeout
    }
}

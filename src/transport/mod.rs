//! Transport Layer
//!
//! Session transports carrying node streams between peers. QUIC is the only
//! driver: it accepts and dials mutually authenticated connections, wraps
//! them in node handles for the node manager, and announces this node over
//! the broadcast carrier.

pub mod quic;

use crate::error::FabricError;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors related to transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("tls configuration failed: {0}")]
    Tls(#[from] rustls::Error),

    #[error("quic crypto setup failed: {0}")]
    Crypto(#[from] quinn::crypto::rustls::NoInitialCipherSuite),

    #[error("connect failed: {0}")]
    Connect(#[from] quinn::ConnectError),

    #[error("connection failed: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("invalid transport address: {0}")]
    InvalidAddress(String),

    #[error("invalid announcement: {0}")]
    InvalidAnnouncement(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for FabricError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Io(e) => FabricError::Io(e),
            other => FabricError::Transport(other.to_string()),
        }
    }
}

/// Resolve `host:port` to its first socket address.
pub async fn resolve(address: &str) -> Result<SocketAddr, TransportError> {
    tokio::net::lookup_host(address)
        .await
        .map_err(|e| TransportError::InvalidAddress(format!("{}: {}", address, e)))?
        .next()
        .ok_or_else(|| TransportError::InvalidAddress(address.to_string()))
}

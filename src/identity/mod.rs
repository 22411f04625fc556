//! Pan Identity System
//!
//! A node is named by the DER SubjectPublicKeyInfo of its self-signed TLS
//! certificate. The [`IdentityStore`] keeps the certificate and key on disk
//! under the configured root path, regenerates them when they are missing
//! or corrupt, and hot-reloads them on settings changes.

mod certificate;
mod node_id;
mod store;

use std::path::PathBuf;
use thiserror::Error;

pub use certificate::{generate, hash_code, node_id_of, parse, NodeCredentials, PemCredentials};
pub use node_id::NodeId;
pub use store::{IdentityStore, NodeSettingsListener, ReloadOutcome};

/// Errors that can occur in identity operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("credential file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("certificate generation failed: {0}")]
    Generate(#[from] rcgen::Error),

    #[error("no certificate in PEM data")]
    NoCertificate,

    #[error("no private key in PEM data")]
    NoPrivateKey,

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("private key does not match certificate")]
    KeyMismatch,

    #[error("invalid hex encoding: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("node credentials unavailable")]
    Unavailable,
}

//! Peer identifier: the DER-encoded SubjectPublicKeyInfo of its certificate.

use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

use super::IdentityError;

/// Stable peer identifier.
///
/// The bytes are the DER SubjectPublicKeyInfo of the peer certificate, so a
/// peer keeps its id across restarts for as long as it keeps its key.
/// Ordering is lexicographic over the raw bytes.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(Arc<[u8]>);

impl NodeId {
    /// Create a NodeId from SPKI DER bytes.
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    /// Parse a NodeId from its full hex encoding.
    pub fn from_hex(s: &str) -> Result<Self, IdentityError> {
        Ok(Self::from_bytes(hex::decode(s)?))
    }

    /// Return the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Number of bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// SHA-256 of the id bytes.
    ///
    /// SPKI encodings of one key type share a long common prefix, so logs use
    /// this digest instead of the raw bytes.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(&self.0);
        hasher.finalize().into()
    }

    /// Full hex encoding of the id bytes.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.fingerprint()[..8]))
    }
}

impl AsRef<[u8]> for NodeId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for NodeId {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<&[u8]> for NodeId {
    fn from(bytes: &[u8]) -> Self {
        Self::from_bytes(bytes)
    }
}

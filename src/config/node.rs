//! Node configuration subsections.
//!
//! The `node.*` bind/advertise addresses and the `guard.*` access switch.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default QUIC bind address.
const DEFAULT_NODE_ADDR: &str = "0.0.0.0:9000";

/// Default outbound dial timeout in milliseconds.
const DEFAULT_DIAL_TIMEOUT_MS: u64 = 3000;

/// Node endpoint configuration (`node.*`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// QUIC bind addresses (`node.address`). Defaults to `["0.0.0.0:9000"]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Vec<String>>,

    /// Addresses advertised over multicast (`node.public_address`).
    /// Defaults to the bind addresses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_address: Option<Vec<String>>,

    /// Outbound dial timeout (`node.dial_timeout_ms`). Defaults to 3000.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dial_timeout_ms: Option<u64>,
}

impl NodeConfig {
    /// Bind addresses, using the default if not configured.
    pub fn addresses(&self) -> Vec<String> {
        self.address
            .clone()
            .unwrap_or_else(|| vec![DEFAULT_NODE_ADDR.to_string()])
    }

    /// Advertised addresses, falling back to the bind addresses.
    pub fn public_addresses(&self) -> Vec<String> {
        self.public_address
            .clone()
            .unwrap_or_else(|| self.addresses())
    }

    /// Outbound dial timeout.
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms.unwrap_or(DEFAULT_DIAL_TIMEOUT_MS))
    }

    pub(super) fn merge(&mut self, other: NodeConfig) {
        if other.address.is_some() {
            self.address = other.address;
        }
        if other.public_address.is_some() {
            self.public_address = other.public_address;
        }
        if other.dial_timeout_ms.is_some() {
            self.dial_timeout_ms = other.dial_timeout_ms;
        }
    }
}

/// Settings-backed node guard (`guard.*`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuardConfig {
    /// Whether the guard is consulted (`guard.enabled`). Defaults to false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Whether unknown nodes are admitted (`guard.access`). Defaults to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<bool>,
}

impl GuardConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }

    pub fn allows_access(&self) -> bool {
        self.access.unwrap_or(true)
    }

    pub(super) fn merge(&mut self, other: GuardConfig) {
        if other.enabled.is_some() {
            self.enabled = other.enabled;
        }
        if other.access.is_some() {
            self.access = other.access;
        }
    }
}

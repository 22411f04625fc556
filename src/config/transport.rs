//! Transport configuration subsections.

use serde::{Deserialize, Serialize};

/// Default multicast group address.
const DEFAULT_BROADCAST_ADDR: &str = "224.0.0.120:9100";

/// Default management address.
const DEFAULT_WEB_ADDR: &str = "127.0.0.1:9002";

/// Multicast discovery configuration (`broadcast.*`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BroadcastConfig {
    /// Multicast group addresses (`broadcast.address`).
    /// Defaults to `["224.0.0.120:9100"]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Vec<String>>,
}

impl BroadcastConfig {
    pub fn addresses(&self) -> Vec<String> {
        self.address
            .clone()
            .unwrap_or_else(|| vec![DEFAULT_BROADCAST_ADDR.to_string()])
    }

    pub(super) fn merge(&mut self, other: BroadcastConfig) {
        if other.address.is_some() {
            self.address = other.address;
        }
    }
}

/// Management surface configuration (`web.*`).
///
/// Only carried through settings; no listener is bound for it here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebConfig {
    /// Management addresses (`web.address`). Defaults to `["127.0.0.1:9002"]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Vec<String>>,
}

impl WebConfig {
    pub fn addresses(&self) -> Vec<String> {
        self.address
            .clone()
            .unwrap_or_else(|| vec![DEFAULT_WEB_ADDR.to_string()])
    }

    pub(super) fn merge(&mut self, other: WebConfig) {
        if other.address.is_some() {
            self.address = other.address;
        }
    }
}

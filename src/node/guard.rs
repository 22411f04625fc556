//! Access guards.

use crate::config::{AppSettings, ConfigListener};
use crate::error::FabricError;
use crate::identity::NodeId;
use crate::runtime::{Capabilities, Module};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Veto point for admitting a peer.
pub trait NodeGuard: Send + Sync {
    /// Disabled guards are skipped.
    fn enabled(&self) -> bool;

    fn access(&self, node_id: &NodeId) -> Result<(), FabricError>;
}

/// Guard driven by the `guard` settings section.
///
/// When enabled with `access: false`, every peer is refused.
pub struct SettingsGuard {
    enabled: AtomicBool,
    access: AtomicBool,
}

impl SettingsGuard {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            access: AtomicBool::new(true),
        }
    }
}

impl Default for SettingsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeGuard for SettingsGuard {
    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn access(&self, node_id: &NodeId) -> Result<(), FabricError> {
        if self.access.load(Ordering::Acquire) {
            Ok(())
        } else {
            debug!(node_id = %node_id, "Guard refused node");
            Err(FabricError::Refused)
        }
    }
}

impl ConfigListener for SettingsGuard {
    fn on_config_updated(&self, settings: &Arc<AppSettings>) {
        self.access.store(settings.guard_access(), Ordering::Release);
        self.enabled.store(settings.guard_enabled(), Ordering::Release);
    }
}

impl Module for SettingsGuard {
    fn name(&self) -> &'static str {
        "guard"
    }

    fn provide(self: Arc<Self>, caps: &mut Capabilities<'_>) {
        caps.add::<dyn NodeGuard>(self.clone())
            .add::<dyn ConfigListener>(self);
    }
}

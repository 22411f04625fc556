//! Identity store.
//!
//! Loads `key.pem` and `cert.pem` from the configured root path on init and
//! on every settings change, regenerates them when they are missing or
//! unusable, and notifies [`NodeSettingsListener`] modules of every install.

use super::certificate::{self, hash_code, NodeCredentials};
use super::{IdentityError, NodeId};
use crate::config::{AppSettings, ConfigListener};
use crate::runtime::{BoxError, Capabilities, ExtensionType, Initialize, Module, Registry};
use std::path::Path;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Receives newly installed node credentials.
pub trait NodeSettingsListener: Send + Sync {
    fn on_node_settings_updated(&self, credentials: &Arc<NodeCredentials>);
}

/// Result of a reload attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Files hash to the installed credentials.
    Unchanged,
    /// Files were parsed and installed.
    Loaded,
    /// Files were missing or unusable and were replaced.
    Regenerated,
    /// A concurrent reload installed newer credentials first.
    Superseded,
}

#[derive(Default)]
struct StoreState {
    credentials: Option<Arc<NodeCredentials>>,
    version: u64,
}

/// Owner of this node's credentials.
#[derive(Default)]
pub struct IdentityStore {
    state: RwLock<StoreState>,
    registry: OnceLock<Arc<Registry>>,
}

impl IdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installed credentials, if any.
    pub fn current(&self) -> Option<Arc<NodeCredentials>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .credentials
            .clone()
    }

    /// Check whether credentials have been loaded or generated.
    pub fn available(&self) -> bool {
        self.current().is_some()
    }

    /// This node's id, if credentials are installed.
    pub fn node_id(&self) -> Option<NodeId> {
        self.current().map(|c| c.node_id().clone())
    }

    /// Number of installs so far.
    pub fn version(&self) -> u64 {
        self.state.read().unwrap_or_else(PoisonError::into_inner).version
    }

    /// Load credentials from the root path of `settings`.
    ///
    /// Any read or parse failure regenerates the files.
    pub fn reload(&self, settings: &AppSettings) -> Result<ReloadOutcome, IdentityError> {
        let (key_path, cert_path) = (settings.key_path(), settings.cert_path());

        let (version, installed_hash) = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            let hash = state.credentials.as_ref().map(|c| c.hash_code().to_vec());
            (state.version, hash)
        };

        let loaded = read_file(&key_path).and_then(|key_pem| {
            let cert_pem = read_file(&cert_path)?;
            Ok((cert_pem, key_pem))
        });

        let parsed = match loaded {
            Ok((cert_pem, key_pem)) => {
                if installed_hash.as_deref() == Some(hash_code(&cert_pem, &key_pem).as_slice()) {
                    return Ok(ReloadOutcome::Unchanged);
                }
                certificate::parse(&cert_pem, &key_pem)
            }
            Err(e) => Err(e),
        };

        let credentials = match parsed {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(
                    path = %settings.root_path().display(),
                    error = %e,
                    "Node credentials unusable, regenerating"
                );
                self.generate(settings)?;
                return Ok(ReloadOutcome::Regenerated);
            }
        };

        let credentials = Arc::new(credentials);
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if state.version != version {
                debug!("Concurrent credential reload won, dropping this one");
                return Ok(ReloadOutcome::Superseded);
            }
            state.version += 1;
            state.credentials = Some(credentials.clone());
        }

        info!(node_id = %credentials.node_id(), "Node credentials loaded");
        self.notify(&credentials);
        Ok(ReloadOutcome::Loaded)
    }

    /// Generate, persist and install fresh credentials.
    pub fn generate(&self, settings: &AppSettings) -> Result<Arc<NodeCredentials>, IdentityError> {
        let pem = certificate::generate()?;
        let credentials = Arc::new(certificate::parse(
            pem.cert_pem.as_bytes(),
            pem.key_pem.as_bytes(),
        )?);

        write_file(&settings.key_path(), pem.key_pem.as_bytes())?;
        write_file(&settings.cert_path(), pem.cert_pem.as_bytes())?;

        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.version += 1;
            state.credentials = Some(credentials.clone());
        }

        info!(
            node_id = %credentials.node_id(),
            path = %settings.root_path().display(),
            "Node credentials generated"
        );
        self.notify(&credentials);
        Ok(credentials)
    }

    fn notify(&self, credentials: &Arc<NodeCredentials>) {
        let Some(registry) = self.registry.get() else {
            return;
        };
        for listener in registry.modules::<dyn NodeSettingsListener>() {
            listener.on_node_settings_updated(credentials);
        }
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, IdentityError> {
    std::fs::read(path).map_err(|e| IdentityError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

fn write_file(path: &Path, data: &[u8]) -> Result<(), IdentityError> {
    let io_err = |e| IdentityError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent() {
        create_dir(parent).map_err(io_err)?;
    }
    std::fs::write(path, data).map_err(io_err)
}

#[cfg(unix)]
fn create_dir(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o750)
        .create(path)
}

#[cfg(not(unix))]
fn create_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}

impl Module for IdentityStore {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn engine_types(&self) -> Vec<ExtensionType> {
        vec![ExtensionType::of::<dyn NodeSettingsListener>()]
    }

    fn provide(self: Arc<Self>, caps: &mut Capabilities<'_>) {
        caps.add::<dyn Initialize>(self.clone())
            .add::<dyn ConfigListener>(self);
    }
}

impl Initialize for IdentityStore {
    fn init(&self, registry: &Arc<Registry>) -> Result<(), BoxError> {
        let _ = self.registry.set(registry.clone());
        if let Some(credentials) = self.current() {
            self.notify(&credentials);
        }
        Ok(())
    }
}

impl ConfigListener for IdentityStore {
    fn on_config_updated(&self, settings: &Arc<AppSettings>) {
        match self.reload(settings) {
            Ok(outcome) => debug!(?outcome, "Credential reload finished"),
            Err(e) => warn!(error = %e, "Credential reload failed"),
        }
    }
}

//! Module Runtime
//!
//! A small dependency-free module system: modules are mounted into an
//! [`Engine`], register the capabilities they implement into a
//! [`Registry`], and are driven through the `Initialize`, `Defer` and
//! `Ready` lifecycle.
//!
//! ## Extension types
//!
//! A capability is a trait object type such as `dyn Ready`. The engine
//! only indexes capabilities whose extension type has been declared, either
//! built in (`Initialize`, `Defer`, `Ready`) or by a module's
//! [`Module::engine_types`]. Declaring the same extension type twice fails
//! the mount.
//!
//! ## Lifecycle
//!
//! 1. `Initialize::init` runs serially in registration order.
//! 2. `Defer::defer` runs serially once every module is initialized.
//! 3. `Ready::ready` runs in parallel; long-running actors loop until the
//!    engine's shutdown signal fires.

mod engine;
mod registry;

pub use engine::Engine;
pub use registry::{Capabilities, Registry};

use async_trait::async_trait;
use std::any::TypeId;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// Boxed error returned by lifecycle hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from mounting or bootstrapping modules.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("duplicate extension type: {0}")]
    DuplicateExtensionType(&'static str),

    #[error("engine already bootstrapped")]
    AlreadyBootstrapped,

    #[error("engine not bootstrapped")]
    NotBootstrapped,

    #[error("init failed: {0}")]
    Init(#[source] BoxError),

    #[error("defer failed: {0}")]
    Defer(#[source] BoxError),

    #[error("ready failed: {0}")]
    Ready(#[source] BoxError),

    #[error("ready task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Identity of an extension type.
#[derive(Clone, Copy)]
pub struct ExtensionType {
    id: TypeId,
    name: &'static str,
}

impl ExtensionType {
    /// Extension type of capability `T` (usually a `dyn Trait`).
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ExtensionType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ExtensionType {}

impl fmt::Debug for ExtensionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A mountable unit of the runtime.
pub trait Module: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Extension types this module adds to the engine before it registers.
    fn engine_types(&self) -> Vec<ExtensionType> {
        Vec::new()
    }

    /// Child modules mounted right after this one.
    fn modules(&self) -> Vec<Arc<dyn Module>> {
        Vec::new()
    }

    /// Register the capabilities this module implements.
    fn provide(self: Arc<Self>, caps: &mut Capabilities<'_>);
}

/// Synchronous initialization with access to the frozen registry.
pub trait Initialize: Send + Sync {
    fn init(&self, registry: &Arc<Registry>) -> Result<(), BoxError>;
}

/// Post-initialization hook for wiring that needs the whole module graph.
pub trait Defer: Send + Sync {
    fn defer(&self) -> Result<(), BoxError>;
}

/// Long-running actor started once the engine is bootstrapped.
#[async_trait]
pub trait Ready: Send + Sync {
    async fn ready(&self, shutdown: Shutdown) -> Result<(), BoxError>;
}

/// Receiver side of the engine shutdown signal.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub(crate) fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is requested.
    pub async fn wait(&mut self) {
        // A dropped sender also means shutdown.
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}

/// Create a shutdown trigger and its receiver.
///
/// Send `true` on the trigger (or drop it) to stop every actor holding the
/// receiver.
pub fn shutdown_channel() -> (watch::Sender<bool>, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (tx, Shutdown::new(rx))
}

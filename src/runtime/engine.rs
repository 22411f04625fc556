//! Mount and bootstrap driver.

use super::{
    shutdown_channel, Capabilities, Defer, EngineError, ExtensionType, Initialize, Module, Ready,
    Registry,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Mounts modules and drives their lifecycle.
pub struct Engine {
    ext_types: Vec<ExtensionType>,
    registry: Registry,
    frozen: Option<Arc<Registry>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown: super::Shutdown,
    ready_tasks: JoinSet<Result<(), EngineError>>,
}

impl Engine {
    /// Create an engine with the built-in lifecycle extension types.
    pub fn new() -> Self {
        let (shutdown_tx, shutdown) = shutdown_channel();
        Self {
            ext_types: vec![
                ExtensionType::of::<dyn Initialize>(),
                ExtensionType::of::<dyn Defer>(),
                ExtensionType::of::<dyn Ready>(),
            ],
            registry: Registry::new(),
            frozen: None,
            shutdown_tx,
            shutdown,
            ready_tasks: JoinSet::new(),
        }
    }

    /// Mount a module and, recursively, its children.
    ///
    /// The module's declared extension types are added first, so a module
    /// can register under the types it declares itself.
    pub fn mount(&mut self, module: Arc<dyn Module>) -> Result<(), EngineError> {
        if self.frozen.is_some() {
            return Err(EngineError::AlreadyBootstrapped);
        }

        for ext in module.engine_types() {
            if self.ext_types.contains(&ext) {
                return Err(EngineError::DuplicateExtensionType(ext.name()));
            }
            self.ext_types.push(ext);
        }

        let name = module.name();
        let children = module.modules();
        let mut caps = Capabilities {
            registry: &mut self.registry,
            ext_types: &self.ext_types,
            module: name,
        };
        module.provide(&mut caps);
        debug!(module = name, children = children.len(), "Module mounted");

        for child in children {
            self.mount(child)?;
        }
        Ok(())
    }

    /// Mount several modules in order.
    pub fn mount_all(
        &mut self,
        modules: impl IntoIterator<Item = Arc<dyn Module>>,
    ) -> Result<(), EngineError> {
        for module in modules {
            self.mount(module)?;
        }
        Ok(())
    }

    /// The registry, once bootstrapped.
    pub fn registry(&self) -> Option<&Arc<Registry>> {
        self.frozen.as_ref()
    }

    /// Run `init` and `defer` serially, then spawn every `ready` actor.
    pub async fn bootstrap(&mut self) -> Result<(), EngineError> {
        if self.frozen.is_some() {
            return Err(EngineError::AlreadyBootstrapped);
        }
        let registry = Arc::new(std::mem::take(&mut self.registry));
        self.frozen = Some(registry.clone());

        registry.traverse::<dyn Initialize, _, _>(|module| {
            module.init(&registry).map_err(EngineError::Init)
        })?;
        registry.traverse::<dyn Defer, _, _>(|module| module.defer().map_err(EngineError::Defer))?;

        let actors = registry.modules::<dyn Ready>();
        info!(actors = actors.len(), "Engine bootstrapped");
        for actor in actors {
            let shutdown = self.shutdown.clone();
            self.ready_tasks.spawn(async move {
                actor.ready(shutdown).await.map_err(EngineError::Ready)
            });
        }
        Ok(())
    }

    /// Wait for every ready actor to return; the first error is reported.
    pub async fn wait(&mut self) -> Result<(), EngineError> {
        if self.frozen.is_none() {
            return Err(EngineError::NotBootstrapped);
        }
        let mut first_err = None;
        while let Some(joined) = self.ready_tasks.join_next().await {
            let result = joined.map_err(EngineError::from).and_then(|r| r);
            if let Err(e) = result {
                warn!(error = %e, "Ready actor failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Signal shutdown and wait for the ready actors to stop.
    pub async fn shutdown(&mut self) -> Result<(), EngineError> {
        let _ = self.shutdown_tx.send(true);
        let result = self.wait().await;
        info!("Engine stopped");
        result
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

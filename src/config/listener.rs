//! Settings fan-out.
//!
//! [`AppConfig`] holds the current [`AppSettings`] and publishes every
//! change to the mounted [`ConfigListener`] modules.

use super::AppSettings;
use crate::runtime::{BoxError, Capabilities, ExtensionType, Initialize, Module, Registry};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use tracing::debug;

/// Receives settings-updated events.
pub trait ConfigListener: Send + Sync {
    fn on_config_updated(&self, settings: &Arc<AppSettings>);
}

/// Module owning the current settings.
pub struct AppConfig {
    settings: RwLock<Arc<AppSettings>>,
    registry: OnceLock<Arc<Registry>>,
}

impl AppConfig {
    pub fn new(settings: AppSettings) -> Self {
        Self {
            settings: RwLock::new(Arc::new(settings)),
            registry: OnceLock::new(),
        }
    }

    /// Current settings snapshot.
    pub fn settings(&self) -> Arc<AppSettings> {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the settings and notify listeners.
    pub fn update(&self, settings: AppSettings) {
        let settings = Arc::new(settings);
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings.clone();
        self.notify(&settings);
    }

    fn notify(&self, settings: &Arc<AppSettings>) {
        // Not yet initialized: listeners get the settings on init.
        let Some(registry) = self.registry.get() else {
            return;
        };
        let listeners = registry.modules::<dyn ConfigListener>();
        debug!(listeners = listeners.len(), "Publishing settings");
        for listener in listeners {
            listener.on_config_updated(settings);
        }
    }
}

impl Module for AppConfig {
    fn name(&self) -> &'static str {
        "config"
    }

    fn engine_types(&self) -> Vec<ExtensionType> {
        vec![ExtensionType::of::<dyn ConfigListener>()]
    }

    fn provide(self: Arc<Self>, caps: &mut Capabilities<'_>) {
        caps.add::<dyn Initialize>(self);
    }
}

impl Initialize for AppConfig {
    fn init(&self, registry: &Arc<Registry>) -> Result<(), BoxError> {
        let _ = self.registry.set(registry.clone());
        self.notify(&self.settings());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Engine;
    use std::sync::Mutex;

    struct Recorder {
        names: Mutex<Vec<String>>,
    }

    impl Module for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn provide(self: Arc<Self>, caps: &mut Capabilities<'_>) {
            caps.add::<dyn ConfigListener>(self);
        }
    }

    impl ConfigListener for Recorder {
        fn on_config_updated(&self, settings: &Arc<AppSettings>) {
            self.names.lock().unwrap().push(settings.name());
        }
    }

    #[tokio::test]
    async fn test_listeners_notified_on_init_and_update() {
        let mut initial = AppSettings::new();
        initial.name = Some("first".to_string());
        let config = Arc::new(AppConfig::new(initial));
        let recorder = Arc::new(Recorder {
            names: Mutex::new(Vec::new()),
        });

        // Updates before bootstrap are held until init.
        let mut early = AppSettings::new();
        early.name = Some("early".to_string());
        config.update(early);

        let mut engine = Engine::new();
        engine.mount(config.clone()).unwrap();
        engine.mount(recorder.clone()).unwrap();
        engine.bootstrap().await.unwrap();

        let mut next = AppSettings::new();
        next.name = Some("second".to_string());
        config.update(next);

        assert_eq!(*recorder.names.lock().unwrap(), vec!["early", "second"]);
        assert_eq!(config.settings().name(), "second");
        engine.shutdown().await.unwrap();
    }
}

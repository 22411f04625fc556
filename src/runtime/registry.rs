//! Type-indexed module registry.
//!
//! For every extension type mounted in the engine, the registry keeps the
//! modules that registered under it, in registration order. Lookups are by
//! the capability trait object type, e.g. `registry.modules::<dyn Ready>()`.

use super::ExtensionType;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Registry of mounted modules keyed by extension type.
#[derive(Default)]
pub struct Registry {
    modules: HashMap<TypeId, Vec<Box<dyn Any + Send + Sync>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a module under extension type `T`.
    pub(super) fn append<T>(&mut self, module: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let entries = self.modules.entry(TypeId::of::<T>()).or_default();
        let exists = entries
            .iter()
            .filter_map(|entry| entry.downcast_ref::<Arc<T>>())
            .any(|existing| Arc::ptr_eq(existing, &module));
        if !exists {
            entries.push(Box::new(module));
        }
    }

    /// All modules registered under `T`, in registration order.
    pub fn modules<T>(&self) -> Vec<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.modules
            .get(&TypeId::of::<T>())
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.downcast_ref::<Arc<T>>())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of modules registered under `T`.
    pub fn count<T>(&self) -> usize
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.modules
            .get(&TypeId::of::<T>())
            .map_or(0, |entries| entries.len())
    }

    /// Visit every module registered under `T`; the first error stops.
    pub fn traverse<T, E, F>(&self, mut f: F) -> Result<(), E>
    where
        T: ?Sized + Send + Sync + 'static,
        F: FnMut(&Arc<T>) -> Result<(), E>,
    {
        for module in self.modules::<T>() {
            f(&module)?;
        }
        Ok(())
    }
}

/// Registration handle passed to [`super::Module::provide`].
///
/// Only capabilities whose extension type is already mounted are
/// registered; the rest are skipped.
pub struct Capabilities<'a> {
    pub(super) registry: &'a mut Registry,
    pub(super) ext_types: &'a [ExtensionType],
    pub(super) module: &'static str,
}

impl Capabilities<'_> {
    /// Register `value` under extension type `T`.
    pub fn add<T>(&mut self, value: Arc<T>) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let ext = ExtensionType::of::<T>();
        if self.ext_types.contains(&ext) {
            self.registry.append(value);
        } else {
            debug!(
                module = self.module,
                ext = ext.name(),
                "Extension type not mounted yet, capability skipped"
            );
        }
        self
    }
}

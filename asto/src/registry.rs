//! Backend registry
//!
//! Maps a configuration discriminator (the `type` field) to the factory that
//! builds the storage. The process-wide [`registry`] holds the built-in
//! backends and is never mutated; applications with extra backends build
//! their own [`StorageRegistry`] at startup:
//!
//! ```
//! use std::sync::Arc;
//! use asto::{Config, InMemoryStorage, Storage, StorageRegistry};
//!
//! fn scratch(_config: &Config) -> asto::Result<Arc<dyn Storage>> {
//!     Ok(Arc::new(InMemoryStorage::new()))
//! }
//!
//! let mut registry = StorageRegistry::builtin();
//! registry.register("scratch", scratch);
//!
//! let config = Config::new().with("type", "scratch");
//! let storage = registry.from_config(&config).unwrap();
//! assert_eq!(storage.identifier(), "memory");
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{ConfigError, Result};
use crate::fs::FileStorage;
use crate::memory::InMemoryStorage;
use crate::storage::Storage;

/// Builds a storage from its configuration, validating it eagerly
pub type StorageFactory = fn(&Config) -> Result<Arc<dyn Storage>>;

/// Discriminator to factory table
#[derive(Clone, Default)]
pub struct StorageRegistry {
    factories: HashMap<String, StorageFactory>,
}

impl StorageRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `memory`, `fs`, and `sqlite` when that feature is on
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("memory", InMemoryStorage::from_config);
        registry.register("fs", FileStorage::from_config);
        #[cfg(feature = "sqlite")]
        registry.register("sqlite", crate::sqlite::SqliteStorage::from_config);
        registry
    }

    /// Register a factory, replacing any previous one under `name`
    pub fn register(&mut self, name: impl Into<String>, factory: StorageFactory) {
        let name = name.into();
        if self.factories.insert(name.clone(), factory).is_some() {
            warn!(backend = %name, "storage factory replaced");
        }
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered discriminators, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build the storage registered under `name`
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownBackend`] naming `name`, or the factory's error.
    pub fn create(&self, name: &str, config: &Config) -> Result<Arc<dyn Storage>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ConfigError::UnknownBackend(name.to_string()))?;
        let storage = factory(config)?;
        debug!(backend = %name, storage = %storage.identifier(), "storage created");
        Ok(storage)
    }

    /// Build the storage named by the configuration's `type` field
    ///
    /// # Errors
    ///
    /// Missing discriminator, unknown backend, or the factory's error.
    pub fn from_config(&self, config: &Config) -> Result<Arc<dyn Storage>> {
        self.create(config.backend()?, config)
    }
}

impl std::fmt::Debug for StorageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageRegistry")
            .field("backends", &self.names())
            .finish()
    }
}

lazy_static! {
    static ref BUILTIN: StorageRegistry = StorageRegistry::builtin();
}

/// Process-wide registry of the built-in backends
#[must_use]
pub fn registry() -> &'static StorageRegistry {
    &BUILTIN
}

/// Build a storage from configuration through the built-in registry
///
/// # Errors
///
/// See [`StorageRegistry::from_config`].
pub fn storage(config: &Config) -> Result<Arc<dyn Storage>> {
    registry().from_config(config)
}

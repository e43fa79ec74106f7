//! Asynchronous, backend-agnostic blob storage
//!
//! Values are byte streams ([`Content`]) addressed by hierarchical [`Key`]s.
//! Every backend implements the [`Storage`] contract; exclusive access to a
//! key set goes through a [`Transaction`].

pub mod config;
pub mod content;
pub mod error;
pub mod fs;
pub mod key;
pub mod lock;
pub mod logging;
pub mod memory;
pub mod meta;
pub mod registry;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod storage;
pub mod sub;
pub mod transaction;

// Re-export core types for convenience
pub use content::Content;
pub use key::Key;
pub use meta::{Attribute, Meta, MetaValue};
pub use storage::{Storage, StorageExt};
pub use transaction::{transactionally, Transaction};

// Re-export errors
pub use error::{ConfigError, ContentError, LockError, Result, StorageError};

// Re-export locking
pub use lock::{KeysLock, Lock, LockTable};

// Re-export backends and decorators
pub use fs::FileStorage;
pub use logging::LoggingStorage;
pub use memory::InMemoryStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
pub use sub::SubStorage;

// Re-export configuration and registry
pub use config::{Config, Credentials, FsSettings, RedisSettings, S3Settings, SqliteSettings};
pub use registry::{registry, storage, StorageFactory, StorageRegistry};

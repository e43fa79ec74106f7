//! Storage contract
//!
//! Every backend implements [`Storage`]. All operations are asynchronous and
//! must not park a worker thread while waiting on I/O, a lock, or a slow
//! [`Content`] producer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  Transaction                        │
//! │  - fixed key set                    │
//! │  - holds a Lock until commit/abort  │
//! └─────────────────────────────────────┘
//!          ▲
//!          │ StorageExt::transaction()
//!          ▼
//! ┌─────────────────────────────────────┐
//! │  Storage (this trait)               │
//! │  - exists / list / save / value     │
//! │  - move_to / delete / metadata      │
//! │  - lock(keys): locking strategy     │
//! └─────────────────────────────────────┘
//!      ▲         ▲           ▲
//!      │         │           │
//!  InMemory  FileStorage  SqliteStorage
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::content::Content;
use crate::error::Result;
use crate::key::Key;
use crate::lock::Lock;
use crate::meta::Meta;
use crate::transaction::Transaction;

/// Backend-agnostic blob storage
///
/// Implementations are safe to call concurrently from many tasks. Two
/// concurrent `save` calls on the same key resolve in a backend-defined way
/// (last writer wins for the built-in backends) unless the callers coordinate
/// through a [`Transaction`].
#[async_trait]
pub trait Storage: Send + Sync {
    /// Whether a value is stored under `key`
    async fn exists(&self, key: &Key) -> Result<bool>;

    /// Keys nested under `prefix`, sorted
    ///
    /// A key equal to `prefix` is not listed. The root prefix lists every key.
    async fn list(&self, prefix: &Key) -> Result<Vec<Key>>;

    /// Store `content` under `key`, overwriting any previous value
    ///
    /// The new value becomes visible only once `content` is fully drained.
    async fn save(&self, key: &Key, content: Content) -> Result<()>;

    /// Stored value
    ///
    /// # Errors
    ///
    /// [`StorageError::NotFound`](crate::StorageError::NotFound) if absent.
    async fn value(&self, key: &Key) -> Result<Content>;

    /// Move a value, overwriting `destination`
    async fn move_to(&self, source: &Key, destination: &Key) -> Result<()>;

    /// Remove a value
    ///
    /// Whether removing an absent key fails is backend-declared; every
    /// built-in backend reports `NotFound`.
    async fn delete(&self, key: &Key) -> Result<()>;

    /// Attributes the backend can report for `key`
    async fn metadata(&self, key: &Key) -> Result<Meta>;

    /// Unacquired lock over `keys`; this is where a backend picks its
    /// locking strategy
    fn lock(&self, keys: &[Key]) -> Box<dyn Lock>;

    /// Human-readable backend description, used in logs
    fn identifier(&self) -> String;
}

/// Transaction entry point, available on every [`Storage`] including
/// `dyn Storage`
pub trait StorageExt: Storage {
    /// Acquire the lock over `keys` and return a transaction bound to them
    ///
    /// Overlapping key sets serialize; disjoint ones run concurrently.
    fn transaction(
        &self,
        keys: &[Key],
    ) -> impl Future<Output = Result<Transaction<'_, Self>>> + Send;
}

impl<S: Storage + ?Sized> StorageExt for S {
    async fn transaction(&self, keys: &[Key]) -> Result<Transaction<'_, Self>> {
        Transaction::begin(self, keys).await
    }
}

#[async_trait]
impl<S: Storage + ?Sized> Storage for Arc<S> {
    async fn exists(&self, key: &Key) -> Result<bool> {
        (**self).exists(key).await
    }

    async fn list(&self, prefix: &Key) -> Result<Vec<Key>> {
        (**self).list(prefix).await
    }

    async fn save(&self, key: &Key, content: Content) -> Result<()> {
        (**self).save(key, content).await
    }

    async fn value(&self, key: &Key) -> Result<Content> {
        (**self).value(key).await
    }

    async fn move_to(&self, source: &Key, destination: &Key) -> Result<()> {
        (**self).move_to(source, destination).await
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        (**self).delete(key).await
    }

    async fn metadata(&self, key: &Key) -> Result<Meta> {
        (**self).metadata(key).await
    }

    fn lock(&self, keys: &[Key]) -> Box<dyn Lock> {
        (**self).lock(keys)
    }

    fn identifier(&self) -> String {
        (**self).identifier()
    }
}

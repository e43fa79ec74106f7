//! Storage decorator that traces every operation

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::content::Content;
use crate::error::Result;
use crate::key::Key;
use crate::lock::Lock;
use crate::meta::Meta;
use crate::storage::Storage;

/// Wraps a storage and emits a `debug` event per operation
///
/// Failures are logged at `warn`, except `NotFound`, which callers routinely
/// probe for and is logged at `debug`. Results pass through unchanged.
pub struct LoggingStorage<S> {
    inner: S,
}

impl<S: Storage> LoggingStorage<S> {
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn report<T>(&self, op: &str, key: &Key, result: &Result<T>) {
        let storage = self.inner.identifier();
        match result {
            Ok(_) => debug!(storage = %storage, key = %key, "{op}"),
            Err(e) if e.is_not_found() => {
                debug!(storage = %storage, key = %key, "{op}: not found");
            }
            Err(e) => warn!(storage = %storage, key = %key, error = %e, "{op} failed"),
        }
    }
}

#[async_trait]
impl<S: Storage> Storage for LoggingStorage<S> {
    async fn exists(&self, key: &Key) -> Result<bool> {
        let result = self.inner.exists(key).await;
        if let Ok(found) = &result {
            debug!(storage = %self.inner.identifier(), key = %key, found, "exists");
        } else {
            self.report("exists", key, &result);
        }
        result
    }

    async fn list(&self, prefix: &Key) -> Result<Vec<Key>> {
        let result = self.inner.list(prefix).await;
        if let Ok(keys) = &result {
            debug!(storage = %self.inner.identifier(), prefix = %prefix, count = keys.len(), "list");
        } else {
            self.report("list", prefix, &result);
        }
        result
    }

    async fn save(&self, key: &Key, content: Content) -> Result<()> {
        let size = content.size();
        let result = self.inner.save(key, content).await;
        if result.is_ok() {
            debug!(storage = %self.inner.identifier(), key = %key, size = ?size, "save");
        } else {
            self.report("save", key, &result);
        }
        result
    }

    async fn value(&self, key: &Key) -> Result<Content> {
        let result = self.inner.value(key).await;
        self.report("value", key, &result);
        result
    }

    async fn move_to(&self, source: &Key, destination: &Key) -> Result<()> {
        let result = self.inner.move_to(source, destination).await;
        match &result {
            Ok(()) => debug!(
                storage = %self.inner.identifier(),
                source = %source,
                destination = %destination,
                "move"
            ),
            Err(_) => self.report("move", source, &result),
        }
        result
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        let result = self.inner.delete(key).await;
        self.report("delete", key, &result);
        result
    }

    async fn metadata(&self, key: &Key) -> Result<Meta> {
        let result = self.inner.metadata(key).await;
        self.report("metadata", key, &result);
        result
    }

    fn lock(&self, keys: &[Key]) -> Box<dyn Lock> {
        self.inner.lock(keys)
    }

    fn identifier(&self) -> String {
        self.inner.identifier()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStorage;
    use crate::storage::StorageExt;

    #[tokio::test]
    async fn test_results_pass_through() {
        let storage = LoggingStorage::new(InMemoryStorage::new());
        let key = Key::parse("logged");

        storage.save(&key, Content::from("v")).await.unwrap();
        assert!(storage.exists(&key).await.unwrap());
        assert_eq!(storage.list(&Key::ROOT).await.unwrap(), vec![key.clone()]);
        assert!(storage.value(&Key::parse("absent")).await.unwrap_err().is_not_found());
        assert_eq!(storage.identifier(), "memory");
        assert_eq!(storage.inner().len(), 1);
    }

    #[tokio::test]
    async fn test_lock_is_the_inner_storage_lock() {
        let storage = LoggingStorage::new(InMemoryStorage::new());
        let key = Key::parse("k");

        let tx = storage.transaction(&[key.clone()]).await.unwrap();
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            storage.inner().transaction(&[key.clone()]),
        )
        .await;
        assert!(blocked.is_err());
        tx.commit().await.unwrap();

        let tx = storage.inner().transaction(&[key]).await.unwrap();
        tx.commit().await.unwrap();
    }
}

//! Storage view rooted at a key prefix

use async_trait::async_trait;

use crate::content::Content;
use crate::error::{Result, StorageError};
use crate::key::Key;
use crate::lock::Lock;
use crate::meta::Meta;
use crate::storage::Storage;

/// Exposes the keys of `inner` under `prefix` with the prefix removed
///
/// `SubStorage::new(inner, "repo")` stores key `a/b` as `repo/a/b` in
/// `inner`. Locks are taken on the mapped keys, so transactions through the
/// view and directly on `inner` exclude each other.
pub struct SubStorage<S> {
    prefix: Key,
    inner: S,
}

impl<S: Storage> SubStorage<S> {
    #[must_use]
    pub fn new(inner: S, prefix: impl Into<Key>) -> Self {
        Self {
            prefix: prefix.into(),
            inner,
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &Key {
        &self.prefix
    }

    fn outer(&self, key: &Key) -> Key {
        self.prefix.join(key)
    }

    /// Translate errors that name an inner key back to the view's key
    ///
    /// The inner backend decides which key an error names (the source or the
    /// destination of a move); the view keeps that choice.
    fn local(&self, error: StorageError) -> StorageError {
        let local = |key: Key| key.strip_prefix(&self.prefix).unwrap_or(key);
        match error {
            StorageError::NotFound(key) => StorageError::NotFound(local(key)),
            StorageError::Io { key, source } => StorageError::Io {
                key: local(key),
                source,
            },
            StorageError::Backend { key, reason } => StorageError::Backend {
                key: local(key),
                reason,
            },
            StorageError::OutsideTransaction(key) => StorageError::OutsideTransaction(local(key)),
            other => other,
        }
    }
}

#[async_trait]
impl<S: Storage> Storage for SubStorage<S> {
    async fn exists(&self, key: &Key) -> Result<bool> {
        self.inner
            .exists(&self.outer(key))
            .await
            .map_err(|e| self.local(e))
    }

    async fn list(&self, prefix: &Key) -> Result<Vec<Key>> {
        let keys = self
            .inner
            .list(&self.outer(prefix))
            .await
            .map_err(|e| self.local(e))?;
        Ok(keys
            .iter()
            .filter_map(|key| key.strip_prefix(&self.prefix))
            .collect())
    }

    async fn save(&self, key: &Key, content: Content) -> Result<()> {
        self.inner
            .save(&self.outer(key), content)
            .await
            .map_err(|e| self.local(e))
    }

    async fn value(&self, key: &Key) -> Result<Content> {
        self.inner
            .value(&self.outer(key))
            .await
            .map_err(|e| self.local(e))
    }

    async fn move_to(&self, source: &Key, destination: &Key) -> Result<()> {
        self.inner
            .move_to(&self.outer(source), &self.outer(destination))
            .await
            .map_err(|e| self.local(e))
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        self.inner
            .delete(&self.outer(key))
            .await
            .map_err(|e| self.local(e))
    }

    async fn metadata(&self, key: &Key) -> Result<Meta> {
        self.inner
            .metadata(&self.outer(key))
            .await
            .map_err(|e| self.local(e))
    }

    fn lock(&self, keys: &[Key]) -> Box<dyn Lock> {
        let mapped: Vec<Key> = keys.iter().map(|key| self.outer(key)).collect();
        self.inner.lock(&mapped)
    }

    fn identifier(&self) -> String {
        format!("sub:{}:{}", self.prefix, self.inner.identifier())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FileStorage;
    use crate::memory::InMemoryStorage;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_keys_are_prefixed_in_inner() {
        let inner = Arc::new(InMemoryStorage::new());
        let sub = SubStorage::new(Arc::clone(&inner), "repo");

        sub.save(&Key::parse("a/b"), Content::from("x")).await.unwrap();

        assert!(inner.exists(&Key::parse("repo/a/b")).await.unwrap());
        assert!(!inner.exists(&Key::parse("a/b")).await.unwrap());
        assert_eq!(sub.list(&Key::ROOT).await.unwrap(), vec![Key::parse("a/b")]);
    }

    #[tokio::test]
    async fn test_list_hides_other_prefixes() {
        let inner = Arc::new(InMemoryStorage::new());
        inner.save(&Key::parse("other/x"), Content::empty()).await.unwrap();
        inner.save(&Key::parse("repo/x"), Content::empty()).await.unwrap();
        let sub = SubStorage::new(Arc::clone(&inner), "repo");

        assert_eq!(sub.list(&Key::ROOT).await.unwrap(), vec![Key::parse("x")]);
    }

    #[tokio::test]
    async fn test_errors_name_local_key() {
        let sub = SubStorage::new(InMemoryStorage::new(), "repo");

        match sub.value(&Key::parse("missing")).await {
            Err(StorageError::NotFound(key)) => assert_eq!(key, Key::parse("missing")),
            other => panic!("Expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_move_error_names_failing_key() {
        let dir = tempfile::tempdir().unwrap();
        let sub = SubStorage::new(FileStorage::new(dir.path()), "repo");
        sub.save(&Key::parse("f"), Content::from("file")).await.unwrap();
        sub.save(&Key::parse("src"), Content::from("moving")).await.unwrap();

        // The destination's parent is a file, so the destination is at fault
        match sub.move_to(&Key::parse("src"), &Key::parse("f/x")).await {
            Err(StorageError::Io { key, .. }) => assert_eq!(key, Key::parse("f/x")),
            other => panic!("Expected Io error, got {other:?}"),
        }

        match sub.move_to(&Key::parse("gone"), &Key::parse("dst")).await {
            Err(StorageError::NotFound(key)) => assert_eq!(key, Key::parse("gone")),
            other => panic!("Expected NotFound, got {other:?}"),
        }
        assert!(sub.exists(&Key::parse("src")).await.unwrap());
    }

    #[test]
    fn test_identifier() {
        let sub = SubStorage::new(InMemoryStorage::new(), "a/b");
        assert_eq!(sub.identifier(), "sub:a/b:memory");
    }
}

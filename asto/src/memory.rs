//! In-memory implementation of [`Storage`]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::config::Config;
use crate::content::Content;
use crate::error::{Result, StorageError};
use crate::key::Key;
use crate::lock::{Lock, LockTable};
use crate::meta::{Attribute, Meta, MetaValue};
use crate::storage::Storage;

struct Entry {
    data: Bytes,
    created: SystemTime,
    modified: SystemTime,
    accessed: SystemTime,
}

impl Entry {
    fn new(data: Bytes, created: SystemTime) -> Self {
        let now = SystemTime::now();
        Self {
            data,
            created,
            modified: now,
            accessed: now,
        }
    }
}

/// Ordered map based storage, useful for testing and single-process use
///
/// `delete` and `move_to` of an absent key fail with `NotFound`.
pub struct InMemoryStorage {
    entries: Mutex<BTreeMap<Key, Entry>>,
    locks: LockTable,
}

impl InMemoryStorage {
    /// Create a new empty storage
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            locks: LockTable::new(),
        }
    }

    /// Registry factory; the `memory` backend takes no fields
    ///
    /// # Errors
    ///
    /// Never fails; the signature matches the other factories.
    pub fn from_config(_config: &Config) -> Result<Arc<dyn Storage>> {
        Ok(Arc::new(Self::new()))
    }

    /// Number of stored values
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn exists(&self, key: &Key) -> Result<bool> {
        Ok(self.entries.lock().contains_key(key))
    }

    async fn list(&self, prefix: &Key) -> Result<Vec<Key>> {
        let entries = self.entries.lock();
        // Keys sharing a prefix are contiguous in segment order
        Ok(entries
            .range(prefix.clone()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .filter(|key| *key != prefix)
            .cloned()
            .collect())
    }

    async fn save(&self, key: &Key, content: Content) -> Result<()> {
        // Drain before touching the map: an unfinished producer leaves the
        // previous value in place
        let data = content.bytes().await?;
        let mut entries = self.entries.lock();
        let created = entries
            .get(key)
            .map_or_else(SystemTime::now, |old| old.created);
        entries.insert(key.clone(), Entry::new(data, created));
        Ok(())
    }

    async fn value(&self, key: &Key) -> Result<Content> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| StorageError::NotFound(key.clone()))?;
        entry.accessed = SystemTime::now();
        Ok(Content::from(entry.data.clone()))
    }

    async fn move_to(&self, source: &Key, destination: &Key) -> Result<()> {
        let mut entries = self.entries.lock();
        let entry = entries
            .remove(source)
            .ok_or_else(|| StorageError::NotFound(source.clone()))?;
        let moved = Entry::new(entry.data, entry.created);
        entries.insert(destination.clone(), moved);
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        self.entries
            .lock()
            .remove(key)
            .map(drop)
            .ok_or_else(|| StorageError::NotFound(key.clone()))
    }

    async fn metadata(&self, key: &Key) -> Result<Meta> {
        let entries = self.entries.lock();
        let entry = entries
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.clone()))?;
        Ok(Meta::new()
            .with(Attribute::Size, Some(MetaValue::Bytes(entry.data.len() as u64)))
            .with(Attribute::Created, Some(MetaValue::Time(entry.created)))
            .with(Attribute::Modified, Some(MetaValue::Time(entry.modified)))
            .with(Attribute::Accessed, Some(MetaValue::Time(entry.accessed))))
    }

    fn lock(&self, keys: &[Key]) -> Box<dyn Lock> {
        Box::new(self.locks.lock(keys.iter().cloned()))
    }

    fn identifier(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_then_value() {
        let storage = InMemoryStorage::new();
        let key = Key::parse("test/path");

        storage.save(&key, Content::from("hello world")).await.unwrap();

        let data = storage.value(&key).await.unwrap().bytes().await.unwrap();
        assert_eq!(&data[..], b"hello world");
    }

    #[tokio::test]
    async fn test_value_not_found() {
        let storage = InMemoryStorage::new();

        match storage.value(&Key::parse("nonexistent")).await {
            Err(StorageError::NotFound(key)) => assert_eq!(key.string(), "nonexistent"),
            other => panic!("Expected NotFound error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_save_overwrites_and_keeps_created() {
        let storage = InMemoryStorage::new();
        let key = Key::parse("a");

        storage.save(&key, Content::from("initial data")).await.unwrap();
        let before = storage.metadata(&key).await.unwrap();
        storage.save(&key, Content::from("new")).await.unwrap();
        let after = storage.metadata(&key).await.unwrap();

        assert_eq!(after.size(), Some(3));
        assert_eq!(
            before.time(Attribute::Created),
            after.time(Attribute::Created)
        );
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_list_skips_prefix_itself_and_siblings() {
        let storage = InMemoryStorage::new();
        for path in ["dir1", "dir1/file1", "dir1/sub/file2", "dir11/file1", "dir2/file1"] {
            storage.save(&Key::parse(path), Content::empty()).await.unwrap();
        }

        let keys = storage.list(&Key::parse("dir1")).await.unwrap();
        assert_eq!(
            keys,
            vec![Key::parse("dir1/file1"), Key::parse("dir1/sub/file2")]
        );
    }

    #[tokio::test]
    async fn test_move_and_delete() {
        let storage = InMemoryStorage::new();
        let from = Key::parse("from");
        let to = Key::parse("to");

        storage.save(&from, Content::from("data")).await.unwrap();
        storage.move_to(&from, &to).await.unwrap();
        assert!(!storage.exists(&from).await.unwrap());
        assert!(storage.exists(&to).await.unwrap());

        storage.delete(&to).await.unwrap();
        assert!(storage.is_empty());
        assert!(storage.delete(&to).await.unwrap_err().is_not_found());
        assert!(storage.move_to(&from, &to).await.unwrap_err().is_not_found());
    }
}

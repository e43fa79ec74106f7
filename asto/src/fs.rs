//! Local filesystem implementation of [`Storage`]
//!
//! Each key maps to a file under the root directory, one directory level per
//! key segment. Writes go to a temporary file under `<root>/.tmp` and are
//! renamed into place once the content is fully drained, so a reader sees
//! either the old value or the new one, and an unfinished save leaves no
//! visible key.
//!
//! Directories left empty by `delete` or `move_to` are removed up to the root.
//! Pruning excludes directory creation, so a save never finds its freshly
//! created parent gone before the rename.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::{Config, FsSettings};
use crate::content::Content;
use crate::error::{ContentError, Result, StorageError};
use crate::key::Key;
use crate::lock::{Lock, LockTable};
use crate::meta::{Attribute, Meta, MetaValue};
use crate::storage::Storage;

/// Directory for in-flight writes, hidden from listings
const TEMP_DIR: &str = ".tmp";

/// Filesystem-backed storage
///
/// `delete` and `move_to` of an absent key fail with `NotFound`. The
/// first-level name `.tmp` is reserved.
///
/// A key is a file and its prefixes are directories, so a stored key cannot
/// also prefix another stored key. Saving `a/b` while `a` holds a value fails
/// with [`StorageError::Io`]; reading, deleting or moving `a/b` reports
/// `NotFound`. Segments must be plain file names: empty, `.`, `..` and
/// segments with a path separator are rejected with an `InvalidInput` error.
pub struct FileStorage {
    root: PathBuf,
    locks: LockTable,
    temp_seq: AtomicU64,
    /// Shared by directory creation plus rename, exclusive for pruning
    dirs: RwLock<()>,
}

impl FileStorage {
    /// Storage rooted at `root`; the directory is created on first write
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: LockTable::new(),
            temp_seq: AtomicU64::new(0),
            dirs: RwLock::new(()),
        }
    }

    /// Registry factory for the `fs` backend
    ///
    /// # Errors
    ///
    /// Missing or non-string `path`.
    pub fn from_config(config: &Config) -> Result<Arc<dyn Storage>> {
        let settings = FsSettings::from_config(config)?;
        Ok(Arc::new(Self::new(settings.path)))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path of `key`, confined to the root
    fn path(&self, key: &Key) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for segment in key.parts() {
            let mut components = Path::new(segment).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(name)), None) if name == segment.as_str() => {
                    path.push(segment);
                }
                _ => {
                    return Err(StorageError::Io {
                        key: key.clone(),
                        source: io::Error::new(
                            io::ErrorKind::InvalidInput,
                            format!("segment '{segment}' is not a plain file name"),
                        ),
                    });
                }
            }
        }
        Ok(path)
    }

    fn temp_path(&self) -> PathBuf {
        let seq = self.temp_seq.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(TEMP_DIR)
            .join(format!("{}-{seq}", std::process::id()))
    }

    /// Metadata of a regular file, `NotFound` for anything else
    async fn file_metadata(&self, key: &Key) -> Result<std::fs::Metadata> {
        match fs::metadata(self.path(key)?).await {
            Ok(meta) if meta.is_file() => Ok(meta),
            Ok(_) => Err(StorageError::NotFound(key.clone())),
            Err(e) if is_missing(&e) => Err(StorageError::NotFound(key.clone())),
            Err(e) => Err(StorageError::io(key, e)),
        }
    }

    /// Remove empty directories from `path`'s parent up to the root
    async fn prune_parents(&self, path: &Path) {
        let _dirs = self.dirs.write().await;
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == self.root.as_path() || !current.starts_with(&self.root) {
                break;
            }
            // Fails on non-empty directories, which ends the walk
            if fs::remove_dir(current).await.is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

/// No file at the path, including a path running through a regular file
fn is_missing(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

/// Temporary file removed on drop unless persisted
///
/// Covers failed and cancelled saves.
struct TempFile {
    path: PathBuf,
    persisted: bool,
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.persisted {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("cannot remove temp file {}: {e}", self.path.display());
                }
            }
        }
    }
}

async fn write_content(key: &Key, path: &Path, mut content: Content) -> Result<()> {
    let mut file = fs::File::create(path)
        .await
        .map_err(|e| StorageError::io(key, e))?;
    while let Some(chunk) = content.next().await {
        let chunk = chunk.map_err(ContentError::Io)?;
        file.write_all(&chunk)
            .await
            .map_err(|e| StorageError::io(key, e))?;
    }
    file.flush().await.map_err(|e| StorageError::io(key, e))?;
    Ok(())
}

#[async_trait]
impl Storage for FileStorage {
    async fn exists(&self, key: &Key) -> Result<bool> {
        match fs::metadata(self.path(key)?).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(StorageError::io(key, e)),
        }
    }

    async fn list(&self, prefix: &Key) -> Result<Vec<Key>> {
        let start = self.path(prefix)?;
        match fs::metadata(&start).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(Vec::new()),
            Err(e) if is_missing(&e) => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(prefix, e)),
        }

        let mut keys = Vec::new();
        let mut pending = vec![(start, prefix.clone())];
        while let Some((dir, dir_key)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                // Pruned by a concurrent delete or move
                Err(e) if is_missing(&e) => continue,
                Err(e) => return Err(StorageError::io(&dir_key, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::io(&dir_key, e))?
            {
                let name = entry.file_name().to_string_lossy().into_owned();
                if dir_key.is_root() && name == TEMP_DIR {
                    continue;
                }
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| StorageError::io(&dir_key, e))?;
                let key = dir_key.child(name);
                if file_type.is_dir() {
                    pending.push((entry.path(), key));
                } else if file_type.is_file() {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn save(&self, key: &Key, content: Content) -> Result<()> {
        let target = self.path(key)?;
        let mut temp = TempFile {
            path: self.temp_path(),
            persisted: false,
        };
        if let Some(dir) = temp.path.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| StorageError::io(key, e))?;
        }

        write_content(key, &temp.path, content).await?;

        let _dirs = self.dirs.read().await;
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| StorageError::Io {
                    key: key.clone(),
                    source: e,
                })?;
        }
        fs::rename(&temp.path, &target)
            .await
            .map_err(|e| StorageError::Io {
                key: key.clone(),
                source: e,
            })?;
        temp.persisted = true;
        debug!("saved {} to {}", key, target.display());
        Ok(())
    }

    async fn value(&self, key: &Key) -> Result<Content> {
        let size = self.file_metadata(key).await?.len();
        let file = fs::File::open(self.path(key)?)
            .await
            .map_err(|e| StorageError::io(key, e))?;
        Ok(Content::from_reader(file, Some(size)))
    }

    async fn move_to(&self, source: &Key, destination: &Key) -> Result<()> {
        let to = self.path(destination)?;
        self.file_metadata(source).await?;
        if source == destination {
            return Ok(());
        }
        let from = self.path(source)?;
        {
            let _dirs = self.dirs.read().await;
            if let Some(dir) = to.parent() {
                fs::create_dir_all(dir)
                    .await
                    .map_err(|e| StorageError::Io {
                        key: destination.clone(),
                        source: e,
                    })?;
            }
            fs::rename(&from, &to)
                .await
                .map_err(|e| StorageError::io(source, e))?;
        }
        self.prune_parents(&from).await;
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        self.file_metadata(key).await?;
        let path = self.path(key)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| StorageError::io(key, e))?;
        self.prune_parents(&path).await;
        Ok(())
    }

    async fn metadata(&self, key: &Key) -> Result<Meta> {
        let meta = self.file_metadata(key).await?;
        let time = |t: io::Result<std::time::SystemTime>| t.ok().map(MetaValue::Time);
        Ok(Meta::new()
            .with(Attribute::Size, Some(MetaValue::Bytes(meta.len())))
            .with(Attribute::Created, time(meta.created()))
            .with(Attribute::Modified, time(meta.modified()))
            .with(Attribute::Accessed, time(meta.accessed())))
    }

    fn lock(&self, keys: &[Key]) -> Box<dyn Lock> {
        Box::new(self.locks.lock(keys.iter().cloned()))
    }

    fn identifier(&self) -> String {
        format!("fs:{}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_creates_nested_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        let key = Key::parse("a/b/c.txt");

        storage.save(&key, Content::from("nested")).await.unwrap();

        let on_disk = std::fs::read(dir.path().join("a").join("b").join("c.txt")).unwrap();
        assert_eq!(on_disk, b"nested");
    }

    #[tokio::test]
    async fn test_temp_dir_hidden_and_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());

        storage.save(&Key::parse("one"), Content::from("1")).await.unwrap();

        assert_eq!(storage.list(&Key::ROOT).await.unwrap(), vec![Key::parse("one")]);
        let leftovers = std::fs::read_dir(dir.path().join(TEMP_DIR)).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_previous_value() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        let key = Key::parse("k");
        storage.save(&key, Content::from("old")).await.unwrap();

        let chunks: Vec<io::Result<bytes::Bytes>> = vec![
            Ok(bytes::Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "producer died")),
        ];
        let err = storage
            .save(&key, Content::from_stream(futures::stream::iter(chunks), None))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Content(ContentError::Io(_))));

        let data = storage.value(&key).await.unwrap().string().await.unwrap();
        assert_eq!(data, "old");
    }

    #[tokio::test]
    async fn test_delete_prunes_empty_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        let key = Key::parse("x/y/z");
        storage.save(&key, Content::from("z")).await.unwrap();

        storage.delete(&key).await.unwrap();

        assert!(!dir.path().join("x").exists());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn test_directory_is_not_a_value() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        storage.save(&Key::parse("d/f"), Content::from("f")).await.unwrap();

        assert!(!storage.exists(&Key::parse("d")).await.unwrap());
        assert!(storage.value(&Key::parse("d")).await.unwrap_err().is_not_found());
        assert!(storage.delete(&Key::parse("d")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_metadata_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        let key = Key::parse("sized");
        storage.save(&key, Content::from("12345")).await.unwrap();

        let meta = storage.metadata(&key).await.unwrap();
        assert_eq!(meta.size(), Some(5));
        assert!(meta.time(Attribute::Modified).is_some());
    }

    #[tokio::test]
    async fn test_key_beneath_value_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        storage.save(&Key::parse("a"), Content::from("file")).await.unwrap();
        let beneath = Key::parse("a/b");

        assert!(!storage.exists(&beneath).await.unwrap());
        assert!(storage.value(&beneath).await.unwrap_err().is_not_found());
        assert!(storage.metadata(&beneath).await.unwrap_err().is_not_found());
        assert!(storage.delete(&beneath).await.unwrap_err().is_not_found());
        assert!(storage
            .move_to(&beneath, &Key::parse("c"))
            .await
            .unwrap_err()
            .is_not_found());
        assert!(storage.list(&beneath).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_beneath_value_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        storage.save(&Key::parse("a"), Content::from("file")).await.unwrap();

        let err = storage
            .save(&Key::parse("a/b"), Content::from("nested"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Io { ref key, .. } if *key == Key::parse("a/b")));
        let data = storage.value(&Key::parse("a")).await.unwrap().string().await.unwrap();
        assert_eq!(data, "file");
    }

    #[tokio::test]
    async fn test_segments_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        let storage = FileStorage::new(&root);

        for path in ["../escaped", "a/../../escaped", "a//b", ".", "a/./b"] {
            let key = Key::parse(path);
            let err = storage.save(&key, Content::from("x")).await.unwrap_err();
            assert!(
                matches!(&err, StorageError::Io { source, .. } if source.kind() == io::ErrorKind::InvalidInput),
                "{path}: {err}"
            );
            assert!(storage.exists(&key).await.is_err());
        }
        let absolute = Key::new([dir.path().join("abs").to_string_lossy().into_owned()]);
        assert!(storage.save(&absolute, Content::from("x")).await.is_err());

        assert!(!dir.path().join("escaped").exists());
        assert!(!dir.path().join("abs").exists());
        assert!(storage.list(&Key::ROOT).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_prune_does_not_race_sibling_save() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FileStorage::new(dir.path()));
        let (first, second) = (Key::parse("x/a"), Key::parse("x/b"));

        for _ in 0..200 {
            storage.save(&first, Content::from("a")).await.unwrap();
            let delete = {
                let (storage, key) = (Arc::clone(&storage), first.clone());
                tokio::spawn(async move { storage.delete(&key).await })
            };
            let save = {
                let (storage, key) = (Arc::clone(&storage), second.clone());
                tokio::spawn(async move { storage.save(&key, Content::from("b")).await })
            };
            delete.await.unwrap().unwrap();
            save.await.unwrap().unwrap();

            assert!(storage.exists(&second).await.unwrap());
            storage.delete(&second).await.unwrap();
        }
    }
}

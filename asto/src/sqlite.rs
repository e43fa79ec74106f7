//! SQLite-backed implementation of [`Storage`]
//!
//! Values live in a single `blobs` table keyed by the canonical key string.
//! SQLite calls are blocking, so every statement runs on tokio's blocking
//! pool and never parks an async worker.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::config::{Config, SqliteSettings};
use crate::content::Content;
use crate::error::{Result, StorageError};
use crate::key::Key;
use crate::lock::{Lock, LockTable};
use crate::meta::{Attribute, Meta, MetaValue};
use crate::storage::Storage;

/// SQLite-backed blob storage
///
/// `delete` and `move_to` of an absent key fail with `NotFound`.
pub struct SqliteStorage {
    /// Path to the SQLite database file
    db_path: String,
    conn: Arc<Mutex<Connection>>,
    locks: LockTable,
}

impl SqliteStorage {
    /// Open (or create) the database at `db_path`
    ///
    /// Creates the table if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened or table creation fails.
    pub fn open(db_path: &str) -> std::result::Result<Self, rusqlite::Error> {
        let conn = Connection::open(db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS blobs (
                key TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                created INTEGER NOT NULL,
                modified INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            db_path: db_path.to_string(),
            conn: Arc::new(Mutex::new(conn)),
            locks: LockTable::new(),
        })
    }

    /// Registry factory for the `sqlite` backend; opens the database eagerly
    ///
    /// # Errors
    ///
    /// Missing `path`, or a database that cannot be opened.
    pub fn from_config(config: &Config) -> Result<Arc<dyn Storage>> {
        let settings = SqliteSettings::from_config(config)?;
        let storage = Self::open(&settings.path).map_err(|e| StorageError::Backend {
            key: Key::ROOT,
            reason: format!("cannot open '{}': {e}", settings.path),
        })?;
        Ok(Arc::new(storage))
    }

    /// Run a statement on the blocking pool
    async fn run<T, F>(&self, key: &Key, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let backend = |reason: String| StorageError::Backend {
            key: key.clone(),
            reason,
        };
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| backend(e.to_string()))?
        .map_err(|e| backend(e.to_string()))
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

fn from_millis(ms: i64) -> MetaValue {
    MetaValue::Time(UNIX_EPOCH + Duration::from_millis(u64::try_from(ms).unwrap_or(0)))
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn exists(&self, key: &Key) -> Result<bool> {
        let path = key.string();
        self.run(key, move |conn| {
            conn.query_row("SELECT 1 FROM blobs WHERE key = ?1", params![path], |_| {
                Ok(())
            })
            .optional()
            .map(|row| row.is_some())
        })
        .await
    }

    async fn list(&self, prefix: &Key) -> Result<Vec<Key>> {
        // '0' is the character after '/', so [p/, p0) covers every nested key
        let bounds = if prefix.is_root() {
            None
        } else {
            let base = prefix.string();
            Some((format!("{base}/"), format!("{base}0")))
        };
        let mut keys: Vec<Key> = self
            .run(prefix, move |conn| {
                let rows: Vec<String> = match bounds {
                    None => {
                        let mut stmt = conn.prepare("SELECT key FROM blobs")?;
                        let rows = stmt.query_map([], |row| row.get(0))?;
                        rows.collect::<rusqlite::Result<_>>()?
                    }
                    Some((low, high)) => {
                        let mut stmt =
                            conn.prepare("SELECT key FROM blobs WHERE key >= ?1 AND key < ?2")?;
                        let rows = stmt.query_map(params![low, high], |row| row.get(0))?;
                        rows.collect::<rusqlite::Result<_>>()?
                    }
                };
                Ok(rows)
            })
            .await?
            .iter()
            .map(|path| Key::parse(path))
            .collect();
        // Segment order differs from SQL string order ("a-b" vs "a/b")
        keys.sort();
        Ok(keys)
    }

    async fn save(&self, key: &Key, content: Content) -> Result<()> {
        let data = content.bytes().await?;
        let path = key.string();
        self.run(key, move |conn| {
            let now = now_millis();
            conn.execute(
                "INSERT INTO blobs (key, data, created, modified) VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(key) DO UPDATE SET data = excluded.data, modified = excluded.modified",
                params![path, &data[..], now],
            )
            .map(drop)
        })
        .await
    }

    async fn value(&self, key: &Key) -> Result<Content> {
        let path = key.string();
        let data: Option<Vec<u8>> = self
            .run(key, move |conn| {
                conn.query_row(
                    "SELECT data FROM blobs WHERE key = ?1",
                    params![path],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;
        data.map(Content::from)
            .ok_or_else(|| StorageError::NotFound(key.clone()))
    }

    async fn move_to(&self, source: &Key, destination: &Key) -> Result<()> {
        if source == destination {
            return if self.exists(source).await? {
                Ok(())
            } else {
                Err(StorageError::NotFound(source.clone()))
            };
        }
        let from = source.string();
        let to = destination.string();
        let moved = self
            .run(source, move |conn| {
                let tx = conn.transaction()?;
                let present = tx
                    .query_row("SELECT 1 FROM blobs WHERE key = ?1", params![from], |_| {
                        Ok(())
                    })
                    .optional()?
                    .is_some();
                if !present {
                    return Ok(false);
                }
                tx.execute("DELETE FROM blobs WHERE key = ?1", params![to])?;
                tx.execute(
                    "UPDATE blobs SET key = ?1, modified = ?2 WHERE key = ?3",
                    params![to, now_millis(), from],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;
        if moved {
            Ok(())
        } else {
            Err(StorageError::NotFound(source.clone()))
        }
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        let path = key.string();
        let removed = self
            .run(key, move |conn| {
                conn.execute("DELETE FROM blobs WHERE key = ?1", params![path])
            })
            .await?;
        if removed == 0 {
            Err(StorageError::NotFound(key.clone()))
        } else {
            Ok(())
        }
    }

    async fn metadata(&self, key: &Key) -> Result<Meta> {
        let path = key.string();
        let row: Option<(i64, i64, i64)> = self
            .run(key, move |conn| {
                conn.query_row(
                    "SELECT length(data), created, modified FROM blobs WHERE key = ?1",
                    params![path],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
            })
            .await?;
        let (size, created, modified) = row.ok_or_else(|| StorageError::NotFound(key.clone()))?;
        Ok(Meta::new()
            .with(
                Attribute::Size,
                u64::try_from(size).ok().map(MetaValue::Bytes),
            )
            .with(Attribute::Created, Some(from_millis(created)))
            .with(Attribute::Modified, Some(from_millis(modified))))
    }

    fn lock(&self, keys: &[Key]) -> Box<dyn Lock> {
        Box::new(self.locks.lock(keys.iter().cloned()))
    }

    fn identifier(&self) -> String {
        format!("sqlite:{}", self.db_path)
    }
}

//! Asynchronous locks over key sets
//!
//! [`Lock`] is the narrow acquire/release capability a
//! [`Transaction`](crate::Transaction) is built on. Backends pick the locking
//! strategy; the in-process one is [`LockTable`].
//!
//! # In-process strategy
//!
//! `LockTable` keeps one fair async mutex per [`Key`]. A [`KeysLock`] covers a
//! sorted, deduplicated key set and takes the per-key mutexes in ascending key
//! order:
//!
//! - overlapping key sets contend on their shared keys and serialize,
//! - disjoint key sets touch different mutexes and run concurrently,
//! - the global order makes `[a, b]` vs `[b, a]` deadlock-free,
//! - waiters on a key are granted in request order (tokio's mutex is FIFO).
//!
//! An acquire that is cancelled (its future dropped) drops the guards it had
//! collected so far, so it never leaves a key locked.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

use crate::error::{LockError, Result};
use crate::key::Key;

/// Mutual exclusion over one resource identity
///
/// At most one holder at a time. A second `acquire` suspends until the
/// current holder calls `release`. Releasing a lock that is not held is an
/// error, so bookkeeping bugs surface in tests.
#[async_trait]
pub trait Lock: Send + Sync {
    /// Wait until the lock is granted
    async fn acquire(&self) -> Result<()>;

    /// Give the lock back
    ///
    /// # Errors
    ///
    /// [`LockError::NotHeld`] if the lock is not currently held.
    async fn release(&self) -> Result<()>;
}

type Entries = HashMap<Key, Arc<AsyncMutex<()>>>;

/// Per-key lock registry shared by every transaction of one storage
#[derive(Clone, Default)]
pub struct LockTable {
    entries: Arc<Mutex<Entries>>,
}

impl LockTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock handle for a key set (not acquired yet)
    pub fn lock<I>(&self, keys: I) -> KeysLock
    where
        I: IntoIterator<Item = Key>,
    {
        let keys: BTreeSet<Key> = keys.into_iter().collect();
        KeysLock {
            table: self.clone(),
            keys: keys.into_iter().collect(),
            held: Mutex::new(None),
        }
    }

    /// Number of keys with a live mutex
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn entry(&self, key: &Key) -> Arc<AsyncMutex<()>> {
        let mut entries = self.entries.lock();
        Arc::clone(entries.entry(key.clone()).or_default())
    }

    /// Forget mutexes nobody holds or waits on
    fn prune(&self, keys: &[Key]) {
        let mut entries = self.entries.lock();
        for key in keys {
            if entries
                .get(key)
                .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
            {
                entries.remove(key);
            }
        }
    }
}

impl fmt::Debug for LockTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockTable")
            .field("keys", &self.len())
            .finish()
    }
}

/// Lock over a fixed key set, backed by a [`LockTable`]
///
/// Dropping a held `KeysLock` releases it.
pub struct KeysLock {
    table: LockTable,
    keys: Vec<Key>,
    held: Mutex<Option<Vec<OwnedMutexGuard<()>>>>,
}

impl KeysLock {
    /// Sorted, deduplicated keys covered by this lock
    #[must_use]
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.held.lock().is_some()
    }

    fn describe(&self) -> String {
        self.keys
            .iter()
            .map(Key::string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[async_trait]
impl Lock for KeysLock {
    async fn acquire(&self) -> Result<()> {
        let mut guards = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            let mutex = self.table.entry(key);
            guards.push(mutex.lock_owned().await);
        }
        // A second acquire on the same lock queues behind the first, so the
        // slot is always empty here
        *self.held.lock() = Some(guards);
        trace!("lock acquired: [{}]", self.describe());
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        let guards = self.held.lock().take();
        match guards {
            Some(guards) => {
                drop(guards);
                self.table.prune(&self.keys);
                trace!("lock released: [{}]", self.describe());
                Ok(())
            }
            None => Err(LockError::NotHeld(self.describe()).into()),
        }
    }
}

impl Drop for KeysLock {
    fn drop(&mut self) {
        drop(self.held.get_mut().take());
        self.table.prune(&self.keys);
    }
}

impl fmt::Debug for KeysLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeysLock([{}], held={})", self.describe(), self.is_held())
    }
}

//! Lock-scoped, key-restricted views over a storage
//!
//! A [`Transaction`] is created by
//! [`StorageExt::transaction`](crate::StorageExt::transaction), which acquires
//! the storage's lock over the key set first. Operations are forwarded to the
//! storage as they are issued; the lock keeps other transactions over
//! overlapping keys out until [`Transaction::commit`] or
//! [`Transaction::abort`].
//!
//! A transaction dropped without commit or abort (an early return, a panic
//! unwinding, or the owning task being cancelled) still gives its lock back.

use std::collections::BTreeSet;
use std::fmt;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::content::Content;
use crate::error::{Result, StorageError};
use crate::key::Key;
use crate::lock::Lock;
use crate::meta::Meta;
use crate::storage::{Storage, StorageExt};

/// Exclusive access to a fixed key set of one storage
pub struct Transaction<'a, S: Storage + ?Sized> {
    storage: &'a S,
    keys: BTreeSet<Key>,
    lock: Option<Box<dyn Lock>>,
}

impl<'a, S: Storage + ?Sized> Transaction<'a, S> {
    pub(crate) async fn begin(storage: &'a S, keys: &[Key]) -> Result<Self> {
        let keys: BTreeSet<Key> = keys.iter().cloned().collect();
        let sorted: Vec<Key> = keys.iter().cloned().collect();
        let lock = storage.lock(&sorted);
        // Cancelled here: `lock` is dropped and holds nothing
        lock.acquire().await?;
        debug!(
            "transaction started on {}: [{}]",
            storage.identifier(),
            describe(&keys)
        );
        Ok(Self {
            storage,
            keys,
            lock: Some(lock),
        })
    }

    /// Keys this transaction may touch
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.keys.iter()
    }

    #[must_use]
    pub fn contains(&self, key: &Key) -> bool {
        self.keys.contains(key)
    }

    fn check(&self, key: &Key) -> Result<()> {
        if self.keys.contains(key) {
            Ok(())
        } else {
            Err(StorageError::OutsideTransaction(key.clone()))
        }
    }

    pub async fn exists(&self, key: &Key) -> Result<bool> {
        self.check(key)?;
        self.storage.exists(key).await
    }

    pub async fn value(&self, key: &Key) -> Result<Content> {
        self.check(key)?;
        self.storage.value(key).await
    }

    pub async fn save(&self, key: &Key, content: Content) -> Result<()> {
        self.check(key)?;
        self.storage.save(key, content).await
    }

    /// Both keys must belong to the transaction
    pub async fn move_to(&self, source: &Key, destination: &Key) -> Result<()> {
        self.check(source)?;
        self.check(destination)?;
        self.storage.move_to(source, destination).await
    }

    pub async fn delete(&self, key: &Key) -> Result<()> {
        self.check(key)?;
        self.storage.delete(key).await
    }

    pub async fn metadata(&self, key: &Key) -> Result<Meta> {
        self.check(key)?;
        self.storage.metadata(key).await
    }

    /// End the unit of work and release the lock
    ///
    /// # Errors
    ///
    /// Propagates the lock's release error.
    pub async fn commit(mut self) -> Result<()> {
        self.finish("committed").await
    }

    /// Abandon the unit of work and release the lock
    ///
    /// Operations already issued are not rolled back.
    ///
    /// # Errors
    ///
    /// Propagates the lock's release error.
    pub async fn abort(mut self) -> Result<()> {
        self.finish("aborted").await
    }

    async fn finish(&mut self, outcome: &str) -> Result<()> {
        let Some(lock) = self.lock.take() else {
            return Ok(());
        };
        lock.release().await?;
        debug!(
            "transaction {outcome} on {}: [{}]",
            self.storage.identifier(),
            describe(&self.keys)
        );
        Ok(())
    }
}

impl<S: Storage + ?Sized> Drop for Transaction<'_, S> {
    fn drop(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        warn!(
            "transaction on [{}] dropped without commit or abort, releasing lock",
            describe(&self.keys)
        );
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = lock.release().await {
                        warn!("releasing dropped transaction lock failed: {e}");
                    }
                });
            }
            // No runtime to run the release on; dropping the lock is all we can do
            Err(_) => drop(lock),
        }
    }
}

impl<S: Storage + ?Sized> fmt::Debug for Transaction<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transaction([{}], open={})",
            describe(&self.keys),
            self.lock.is_some()
        )
    }
}

fn describe(keys: &BTreeSet<Key>) -> String {
    keys.iter().map(Key::string).collect::<Vec<_>>().join(", ")
}

/// Run `op` inside a transaction over `keys`
///
/// Commits when `op` returns `Ok`, aborts and returns the error otherwise.
///
/// ```
/// use asto::{transactionally, Content, InMemoryStorage, Key, Storage};
///
/// # futures::executor::block_on(async {
/// let storage = InMemoryStorage::new();
/// let counter = Key::parse("counter");
/// storage.save(&counter, Content::from("1")).await.unwrap();
///
/// transactionally(&storage, &[counter.clone()], |tx| {
///     let counter = counter.clone();
///     Box::pin(async move {
///         let n: u64 = tx.value(&counter).await?.parse().await?;
///         tx.save(&counter, Content::from((n + 1).to_string())).await
///     })
/// })
/// .await
/// .unwrap();
///
/// let n: u64 = storage.value(&counter).await.unwrap().parse().await.unwrap();
/// assert_eq!(n, 2);
/// # });
/// ```
///
/// # Errors
///
/// Lock errors, or the error returned by `op`.
pub async fn transactionally<'a, S, T, F>(storage: &'a S, keys: &[Key], op: F) -> Result<T>
where
    S: Storage + ?Sized,
    F: for<'t> FnOnce(&'t Transaction<'a, S>) -> BoxFuture<'t, Result<T>>,
{
    let tx = storage.transaction(keys).await?;
    match op(&tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(release) = tx.abort().await {
                warn!("abort after failed operation also failed: {release}");
            }
            Err(e)
        }
    }
}

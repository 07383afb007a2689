//! In-memory implementation of the transactional key-value contract.

use std::collections::BTreeMap;
use std::ops::RangeBounds;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use super::{KvCursor, KvError, KvResult, KvStore, KvTransaction, Record};
use crate::BytesRange;

type Base = Arc<RwLock<BTreeMap<Bytes, Bytes>>>;

/// In-memory transactional store backed by a `BTreeMap`.
///
/// Each transaction buffers its writes in a private overlay (deletes are kept
/// as tombstones) and merges the overlay over the shared map on every read
/// and scan, so a transaction observes its own writes. Commit applies the
/// overlay under a single write-lock acquisition; rollback drops it.
///
/// Useful for testing and for scenarios where durability is not required.
pub struct MemoryKv {
    data: Base,
}

impl MemoryKv {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn begin(&self) -> KvResult<Box<dyn KvTransaction>> {
        Ok(Box::new(MemoryTransaction {
            base: Arc::clone(&self.data),
            writes: BTreeMap::new(),
        }))
    }
}

/// One transaction over [`MemoryKv`].
///
/// `writes` maps key to `Some(value)` for buffered puts and `None` for
/// buffered deletes.
struct MemoryTransaction {
    base: Base,
    writes: BTreeMap<Bytes, Option<Bytes>>,
}

impl MemoryTransaction {
    fn read_base(&self) -> KvResult<std::sync::RwLockReadGuard<'_, BTreeMap<Bytes, Bytes>>> {
        self.base
            .read()
            .map_err(|e| KvError::Internal(format!("Failed to acquire read lock: {}", e)))
    }
}

#[async_trait]
impl KvTransaction for MemoryTransaction {
    #[tracing::instrument(level = "trace", skip_all)]
    async fn get(&mut self, key: Bytes) -> KvResult<Option<Bytes>> {
        if let Some(buffered) = self.writes.get(&key) {
            return Ok(buffered.clone());
        }
        let base = self.read_base()?;
        Ok(base.get(&key).cloned())
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn set(&mut self, key: Bytes, value: Bytes) -> KvResult<()> {
        self.writes.insert(key, Some(value));
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn delete(&mut self, key: Bytes) -> KvResult<bool> {
        let existed = match self.writes.get(&key) {
            Some(buffered) => buffered.is_some(),
            None => self.read_base()?.contains_key(&key),
        };
        self.writes.insert(key, None);
        Ok(existed)
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn ascend(&mut self, range: BytesRange) -> KvResult<Box<dyn KvCursor + Send>> {
        let mut merged: BTreeMap<Bytes, Bytes> = {
            let base = self.read_base()?;
            base.range((range.start_bound().cloned(), range.end_bound().cloned()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        for (key, buffered) in self
            .writes
            .range((range.start_bound().cloned(), range.end_bound().cloned()))
        {
            match buffered {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        let records: Vec<Record> = merged
            .into_iter()
            .map(|(k, v)| Record::new(k, v))
            .collect();
        Ok(Box::new(MemoryCursor { records, index: 0 }))
    }

    async fn commit(self: Box<Self>) -> KvResult<()> {
        let mut base = self
            .base
            .write()
            .map_err(|e| KvError::Internal(format!("Failed to acquire write lock: {}", e)))?;
        for (key, buffered) in self.writes {
            match buffered {
                Some(value) => {
                    base.insert(key, value);
                }
                None => {
                    base.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> KvResult<()> {
        Ok(())
    }
}

struct MemoryCursor {
    records: Vec<Record>,
    index: usize,
}

#[async_trait]
impl KvCursor for MemoryCursor {
    #[tracing::instrument(level = "trace", skip_all)]
    async fn next(&mut self) -> KvResult<Option<Record>> {
        if self.index >= self.records.len() {
            Ok(None)
        } else {
            let record = self.records[self.index].clone();
            self.index += 1;
            Ok(Some(record))
        }
    }
}

/// Injected failure that fires either once or on every call.
#[cfg(feature = "test-utils")]
#[derive(Clone)]
enum Failure {
    /// Error is returned once, then automatically cleared.
    Once(KvError),
    /// Error is returned on every subsequent call until explicitly cleared.
    Persistent(KvError),
}

#[cfg(feature = "test-utils")]
type FailSlot = arc_swap::ArcSwap<Option<Failure>>;

/// Checks a [`FailSlot`] and returns an error if one is set.
///
/// For [`Failure::Once`], the slot is atomically swapped to `None` so the
/// error fires exactly once.
#[cfg(feature = "test-utils")]
fn check_failure(slot: &FailSlot) -> KvResult<()> {
    let guard = slot.load();
    match guard.as_ref() {
        None => Ok(()),
        Some(Failure::Persistent(err)) => Err(err.clone()),
        Some(Failure::Once(_)) => {
            let prev = slot.swap(Arc::new(None));
            match prev.as_ref() {
                Some(Failure::Once(err)) => Err(err.clone()),
                _ => Ok(()),
            }
        }
    }
}

/// A store wrapper that delegates to an inner [`KvStore`] but can inject
/// failures into `set` and `delete` on demand.
///
/// Failures can be *persistent* (returned on every call until cleared) or
/// *once* (returned on the next call, then automatically cleared). Slots are
/// shared with every open transaction, so a failure armed mid-transaction
/// fires on that transaction's next write.
///
/// Gated behind the `test-utils` feature.
#[cfg(feature = "test-utils")]
pub struct FailingKv {
    inner: Arc<dyn KvStore>,
    fail_set: Arc<FailSlot>,
    fail_delete: Arc<FailSlot>,
}

#[cfg(feature = "test-utils")]
impl FailingKv {
    /// Wraps an existing store, with all failure injections initially `None`.
    pub fn wrap(inner: Arc<dyn KvStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_set: Arc::new(arc_swap::ArcSwap::from_pointee(None)),
            fail_delete: Arc::new(arc_swap::ArcSwap::from_pointee(None)),
        })
    }

    /// Makes `set` return the given error on every subsequent call.
    pub fn fail_set(&self, err: KvError) {
        self.fail_set.store(Arc::new(Some(Failure::Persistent(err))));
    }

    /// Makes `set` return the given error on the next call only.
    pub fn fail_set_once(&self, err: KvError) {
        self.fail_set.store(Arc::new(Some(Failure::Once(err))));
    }

    /// Makes `delete` return the given error on every subsequent call.
    pub fn fail_delete(&self, err: KvError) {
        self.fail_delete
            .store(Arc::new(Some(Failure::Persistent(err))));
    }

    /// Makes `delete` return the given error on the next call only.
    pub fn fail_delete_once(&self, err: KvError) {
        self.fail_delete.store(Arc::new(Some(Failure::Once(err))));
    }

    /// Clears every armed failure.
    pub fn clear(&self) {
        self.fail_set.store(Arc::new(None));
        self.fail_delete.store(Arc::new(None));
    }
}

#[cfg(feature = "test-utils")]
#[async_trait]
impl KvStore for FailingKv {
    async fn begin(&self) -> KvResult<Box<dyn KvTransaction>> {
        Ok(Box::new(FailingTransaction {
            inner: self.inner.begin().await?,
            fail_set: Arc::clone(&self.fail_set),
            fail_delete: Arc::clone(&self.fail_delete),
        }))
    }
}

#[cfg(feature = "test-utils")]
struct FailingTransaction {
    inner: Box<dyn KvTransaction>,
    fail_set: Arc<FailSlot>,
    fail_delete: Arc<FailSlot>,
}

#[cfg(feature = "test-utils")]
#[async_trait]
impl KvTransaction for FailingTransaction {
    async fn get(&mut self, key: Bytes) -> KvResult<Option<Bytes>> {
        self.inner.get(key).await
    }

    async fn set(&mut self, key: Bytes, value: Bytes) -> KvResult<()> {
        check_failure(&self.fail_set)?;
        self.inner.set(key, value).await
    }

    async fn delete(&mut self, key: Bytes) -> KvResult<bool> {
        check_failure(&self.fail_delete)?;
        self.inner.delete(key).await
    }

    async fn ascend(&mut self, range: BytesRange) -> KvResult<Box<dyn KvCursor + Send>> {
        self.inner.ascend(range).await
    }

    async fn commit(self: Box<Self>) -> KvResult<()> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> KvResult<()> {
        self.inner.rollback().await
    }
}

//! The key-value store contract consumed by the keyobject layer.
//!
//! The layer runs entirely on top of a transactional, ordered key-value
//! store. It needs very little from it: point reads and writes, a delete
//! that reports whether the key existed, a bounded ascending scan, and
//! commit/rollback. Any store that can offer those under a transaction can
//! host the layer; [`in_memory::MemoryKv`] is the reference implementation.

pub mod in_memory;

use async_trait::async_trait;
use bytes::Bytes;

use crate::BytesRange;

/// One key-value entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub key: Bytes,
    pub value: Bytes,
}

impl Record {
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }

    /// An entry with an empty value. Index entries are stored this way.
    pub fn empty(key: Bytes) -> Self {
        Self::new(key, Bytes::new())
    }
}

/// Error type for key-value store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvError {
    /// Errors reported by the backing store.
    Storage(String),
    /// Internal errors indicating bugs or invariant violations.
    Internal(String),
}

impl std::error::Error for KvError {}

impl std::fmt::Display for KvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KvError::Storage(msg) => write!(f, "Storage error: {}", msg),
            KvError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

/// Result type alias for key-value store operations.
pub type KvResult<T> = std::result::Result<T, KvError>;

/// A handle to a transactional key-value store.
///
/// This is the factory the database is constructed over: every logical
/// operation of the layer above runs inside one transaction obtained here.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Opens a new transaction.
    async fn begin(&self) -> KvResult<Box<dyn KvTransaction>>;
}

/// One transaction over the store.
///
/// Reads observe the transaction's own earlier writes. Nothing becomes
/// visible to other transactions before [`commit`](Self::commit) returns,
/// and [`rollback`](Self::rollback) discards every buffered change.
#[async_trait]
pub trait KvTransaction: Send {
    /// Returns the value stored at `key`, or `None` if the key is absent.
    async fn get(&mut self, key: Bytes) -> KvResult<Option<Bytes>>;

    /// Stores `value` at `key`, overwriting any existing value.
    async fn set(&mut self, key: Bytes, value: Bytes) -> KvResult<()>;

    /// Removes `key`. Returns whether the key existed.
    ///
    /// Callers above rely on the return value: deleting an index entry that
    /// should exist but does not is an invariant violation there.
    async fn delete(&mut self, key: Bytes) -> KvResult<bool>;

    /// Returns a cursor over the entries in `range`, in ascending key order.
    ///
    /// The cursor is owned and reflects the transaction's own writes at the
    /// time of the call.
    async fn ascend(&mut self, range: BytesRange) -> KvResult<Box<dyn KvCursor + Send>>;

    /// Atomically publishes every buffered write.
    async fn commit(self: Box<Self>) -> KvResult<()>;

    /// Discards every buffered write.
    async fn rollback(self: Box<Self>) -> KvResult<()>;
}

/// Cursor over an ascending range scan.
#[async_trait]
pub trait KvCursor {
    /// Returns the next entry, or `None` when the range is exhausted.
    async fn next(&mut self) -> KvResult<Option<Record>>;
}

//! Shared building blocks for the keyobject storage layer.
//!
//! This crate defines the contract the layer expects from its host key-value
//! store — ordered keys, transactions with read-your-writes semantics, and
//! bounded range scans — together with the in-memory reference backend used
//! by tests and examples.

pub mod bytes;
pub mod kv;

pub use bytes::BytesRange;
pub use kv::in_memory::MemoryKv;
pub use kv::{KvCursor, KvError, KvResult, KvStore, KvTransaction, Record};

#[cfg(feature = "test-utils")]
pub use kv::in_memory::FailingKv;

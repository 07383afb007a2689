//! keyobject - a key-object layer over a transactional key-value store.
//!
//! keyobject turns an ordered key-value store with transactions into a typed
//! object database with automatic secondary indexing. Applications register
//! their record types once, then store and load objects under path-like keys;
//! every indexed field value is mirrored into a secondary index that
//! [`find_by_index`](Transaction::find_by_index) resolves with point-equality
//! lookups.
//!
//! # Architecture
//!
//! Everything lives in one flat keyspace of the host store:
//!
//! - `/ob<user-key>` holds one envelope per object: the serialized payload,
//!   its type name, its own storage key, and the sorted list of index keys
//!   that reference it.
//! - `/ix/<type>/<field>/<value><object-key>` holds one empty-valued entry
//!   per indexed field value of each object.
//!
//! Index maintenance is crash-consistent without any help from the host
//! store beyond transactional writes: new index keys are written *before*
//! the envelope, stale ones are removed *after* it, so an interrupted write
//! can only leave unreferenced index entries behind. Lookups validate every
//! candidate against its envelope and skip such orphans.
//!
//! # Key Concepts
//!
//! - **[`Registry`]**: maps record types to their names, indexed fields, and
//!   payload codec. Created once, shared by the database.
//! - **[`ObjectDb`]**: the entry point; pairs a host [`KvStore`] with the
//!   registry.
//! - **[`Transaction`]**: raw string access (`get`/`set`/`delete`), typed
//!   access (`load`/`store`), and index lookups, all inside one host
//!   transaction.
//! - **[`FindIterator`]**: cursor over index lookup results, yielding only
//!   objects whose envelopes confirm a match on every queried field.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use common::MemoryKv;
//! use keyobject::{IndexField, ObjectDb, Registry};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct User {
//!     name: String,
//!     age: u32,
//! }
//!
//! let registry = Arc::new(Registry::new());
//! registry.register_data_type(
//!     "User",
//!     vec![IndexField::new("Age", |u: &User| u.age.into())],
//! )?;
//!
//! let db = ObjectDb::new(Arc::new(MemoryKv::new()), registry);
//! let mut tx = db.transaction().await?;
//! tx.store("/users/alex", &User { name: "alex".into(), age: 10 }).await?;
//! tx.commit().await?;
//!
//! let mut tx = db.transaction().await?;
//! let mut it = tx.find_by_index(&User { age: 10, ..Default::default() }).await?;
//! let (key, user): (String, User) = it.load_next().await?;
//! ```
//!
//! [`KvStore`]: common::KvStore

mod db;
mod error;
mod fields;
mod iterator;
mod key;
mod model;
mod registry;
mod serde;

pub use db::{ObjectDb, Transaction};
pub use error::{Error, Result};
pub use fields::{IndexField, IndexValue};
pub use iterator::FindIterator;
pub use key::{INDEX_KEYSPACE, IndexKey, OBJECT_KEYSPACE, ObjectKey};
pub use model::STRING_TYPE_NAME;
pub use registry::{DataType, Registry};

//! The object database and its transactions.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use common::{KvStore, KvTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::iterator::FindIterator;
use crate::key::{IndexKey, ObjectKey, diff_index_keys};
use crate::model::Envelope;
use crate::registry::Registry;
use crate::serde::{decode_envelope, encode_envelope};

/// A key-object database layered over a transactional key-value store.
///
/// `ObjectDb` owns nothing but the handle to the host store and the shared
/// type [`Registry`]; all reads and writes happen through a [`Transaction`].
///
/// # Example
///
/// ```ignore
/// use keyobject::{IndexField, ObjectDb, Registry};
///
/// let registry = Arc::new(Registry::new());
/// registry.register_data_type(
///     "User",
///     vec![IndexField::new("Age", |u: &User| u.age.into())],
/// )?;
///
/// let db = ObjectDb::new(Arc::new(MemoryKv::new()), registry);
/// let mut tx = db.transaction().await?;
/// tx.store("/users/alex", &User { name: "alex".into(), age: 10 }).await?;
/// tx.commit().await?;
/// ```
pub struct ObjectDb {
    store: Arc<dyn KvStore>,
    registry: Arc<Registry>,
}

impl ObjectDb {
    /// Creates a key-object database out of a key-value store.
    pub fn new(store: Arc<dyn KvStore>, registry: Arc<Registry>) -> Self {
        Self { store, registry }
    }

    /// The registry this database resolves data types against.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Opens a new transaction.
    pub async fn transaction(&self) -> Result<Transaction> {
        Ok(Transaction {
            kv: self.store.begin().await?,
            registry: Arc::clone(&self.registry),
        })
    }
}

/// One transaction over the object database.
///
/// All operations run against the wrapped key-value transaction; nothing is
/// visible to other transactions until [`commit`](Self::commit). After an
/// operation returns an error the transaction may still be used, but the
/// index keyspace may then carry orphan entries — lookups tolerate and skip
/// them, and [`rollback`](Self::rollback) discards everything either way.
pub struct Transaction {
    pub(crate) kv: Box<dyn KvTransaction>,
    pub(crate) registry: Arc<Registry>,
}

impl Transaction {
    /// Returns the value stored at the given key, in its serialized form for
    /// typed objects.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if nothing is stored at the key.
    pub async fn get(&mut self, key: &str) -> Result<String> {
        let okey = ObjectKey::new(key)?;
        let envelope = self.read_envelope(&okey).await?.ok_or(Error::NotFound)?;
        String::from_utf8(envelope.data.to_vec())
            .map_err(|e| Error::Encoding(format!("value at {} is not valid UTF-8: {}", key, e)))
    }

    /// Stores a raw string at the given key.
    ///
    /// Index keys referring to a previously stored typed object at the same
    /// key are *not* removed: they become orphans, and lookups validate every
    /// reference against the envelope it points to before yielding it.
    pub async fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let okey = ObjectKey::new(key)?;
        let envelope = Envelope::new_string(okey.clone(), value);
        self.kv
            .set(okey.to_bytes(), encode_envelope(&envelope))
            .await?;
        Ok(())
    }

    /// Removes the value or object stored at the given key, along with every
    /// index key its envelope references.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if nothing is stored at the key.
    ///
    /// # Panics
    ///
    /// If a referenced index key is missing from the index keyspace. A
    /// committed envelope's references are always present (the write path
    /// inserts them first), so this is an unrecoverable consistency bug.
    pub async fn delete(&mut self, key: &str) -> Result<()> {
        let okey = ObjectKey::new(key)?;
        let envelope = self.read_envelope(&okey).await?.ok_or(Error::NotFound)?;
        if !self.kv.delete(okey.to_bytes()).await? {
            return Err(Error::NotFound);
        }
        for ikey in &envelope.index_keys {
            if !self.kv.delete(ikey.to_bytes()).await? {
                panic!("index consistency bug: {} is not in the index keyspace", ikey);
            }
        }
        Ok(())
    }

    /// Reads and decodes the object stored at the given key.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if nothing is stored at the key;
    /// [`Error::InvalidInput`] if `T` is not registered or the stored value
    /// was written under a different type.
    pub async fn load<T>(&mut self, key: &str) -> Result<T>
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        let okey = ObjectKey::new(key)?;
        let datatype = self.registry.lookup::<T>()?;
        let envelope = self.read_envelope(&okey).await?.ok_or(Error::NotFound)?;
        if envelope.type_name != datatype.name() {
            return Err(Error::InvalidInput(format!(
                "object at {} has type {:?}, not {:?}",
                key,
                envelope.type_name,
                datatype.name()
            )));
        }
        datatype.decode(&envelope.data)
    }

    /// Stores the object at the given key, updating the secondary index to
    /// reflect its current indexed field values.
    ///
    /// New index keys are written before the envelope is replaced, and stale
    /// index keys are only removed afterwards. An abort between those steps
    /// leaves orphan index keys at worst — never a live envelope whose
    /// references are missing — and lookups skip orphans.
    ///
    /// # Panics
    ///
    /// If a stale index key scheduled for removal is missing from the index
    /// keyspace, which means a consistency bug in the layer itself.
    pub async fn store<T>(&mut self, key: &str, object: &T) -> Result<()>
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        let okey = ObjectKey::new(key)?;
        let datatype = self.registry.lookup::<T>()?;
        let old_keys = match self.read_envelope(&okey).await? {
            Some(envelope) => envelope.index_keys,
            None => Vec::new(),
        };
        let cur = Envelope::new(okey.clone(), object, &datatype)?;

        let (deletions, additions) = diff_index_keys(&old_keys, &cur.index_keys);
        for ikey in &additions {
            self.kv.set(ikey.to_bytes(), Bytes::new()).await?;
            tracing::debug!(key = %okey, index_key = %ikey, "adding index key");
        }
        self.kv
            .set(okey.to_bytes(), encode_envelope(&cur))
            .await?;
        for ikey in &deletions {
            if !self.kv.delete(ikey.to_bytes()).await? {
                panic!("index consistency bug: {} is not in the index keyspace", ikey);
            }
        }
        Ok(())
    }

    /// Scans the secondary index for objects whose indexed field values match
    /// the exemplar.
    ///
    /// The exemplar's non-zero indexed fields select the lookup. The returned
    /// iterator yields exactly the objects that match on *every* selected
    /// field; an object matching only some of them is filtered out.
    pub async fn find_by_index<T>(&mut self, exemplar: &T) -> Result<FindIterator<'_>>
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        let datatype = self.registry.lookup::<T>()?;
        let query = datatype.query_key_map(exemplar)?;
        let queried = query.len();

        let mut scanned: Vec<IndexKey> = Vec::new();
        for ikey in query.into_values() {
            let mut cursor = self.kv.ascend(ikey.scan_range()?).await?;
            while let Some(record) = cursor.next().await? {
                let raw = std::str::from_utf8(&record.key).map_err(|e| {
                    Error::Encoding(format!("index keyspace entry is not valid UTF-8: {}", e))
                })?;
                let scanned_key = IndexKey::parse(raw).map_err(|e| {
                    Error::Encoding(format!("unexpected index key failure: {}", e))
                })?;
                scanned.push(scanned_key);
            }
        }

        let mut grouped: BTreeMap<ObjectKey, Vec<IndexKey>> = BTreeMap::new();
        for ikey in scanned {
            let okey = ikey.object_key()?;
            grouped.entry(okey).or_default().push(ikey);
        }
        let (keys, refs): (Vec<_>, Vec<_>) = grouped.into_iter().unzip();
        Ok(FindIterator::new(self, keys, refs, queried))
    }

    /// Commits all changes made by the transaction.
    pub async fn commit(self) -> Result<()> {
        self.kv.commit().await?;
        Ok(())
    }

    /// Drops all changes made by the transaction.
    pub async fn rollback(self) -> Result<()> {
        self.kv.rollback().await?;
        Ok(())
    }

    pub(crate) async fn read_envelope(&mut self, okey: &ObjectKey) -> Result<Option<Envelope>> {
        match self.kv.get(okey.to_bytes()).await? {
            Some(raw) => Ok(Some(decode_envelope(&raw)?)),
            None => Ok(None),
        }
    }
}

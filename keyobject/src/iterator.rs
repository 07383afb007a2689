//! Iteration over index lookup results.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::db::Transaction;
use crate::error::{Error, Result};
use crate::key::{IndexKey, ObjectKey};
use crate::model::Envelope;

/// Single-shot forward cursor over the candidates of one
/// [`find_by_index`](Transaction::find_by_index) call.
///
/// The iterator borrows its transaction for its whole lifetime, so it cannot
/// outlive a commit or rollback. Candidates are validated lazily as the
/// cursor advances: the index keyspace may contain references to objects that
/// were deleted, rewritten, or never committed, and those are skipped rather
/// than surfaced.
pub struct FindIterator<'tx> {
    tx: &'tx mut Transaction,
    next: usize,
    keys: Vec<ObjectKey>,
    refs: Vec<Vec<IndexKey>>,
    queried: usize,
}

impl<'tx> FindIterator<'tx> {
    pub(crate) fn new(
        tx: &'tx mut Transaction,
        keys: Vec<ObjectKey>,
        refs: Vec<Vec<IndexKey>>,
        queried: usize,
    ) -> Self {
        Self {
            tx,
            next: 0,
            keys,
            refs,
            queried,
        }
    }

    /// Decodes and returns the next matching object together with its user
    /// key, advancing the iterator.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the iterator is exhausted.
    pub async fn load_next<T>(&mut self) -> Result<(String, T)>
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        let datatype = self.tx.registry.lookup::<T>()?;
        let (okey, envelope) = self.next_match().await?;
        let object = datatype.decode(&envelope.data)?;
        Ok((okey.user_key().to_string(), object))
    }

    /// Returns the next matching object's user key and raw serialized
    /// payload, advancing the iterator.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the iterator is exhausted.
    pub async fn get_next(&mut self) -> Result<(String, Bytes)> {
        let (okey, envelope) = self.next_match().await?;
        Ok((okey.user_key().to_string(), envelope.data))
    }

    /// Advances to the next candidate whose committed envelope confirms the
    /// match. Skipped candidates stay skipped; the cursor never revisits a
    /// position.
    async fn next_match(&mut self) -> Result<(ObjectKey, Envelope)> {
        while self.next < self.keys.len() {
            let i = self.next;
            self.next += 1;
            let okey = self.keys[i].clone();

            // The index keyspace can hold stale references, e.g. after a
            // transaction kept going past an error. Only the envelope itself
            // decides whether the candidate is a real match.
            let Some(envelope) = self.tx.read_envelope(&okey).await? else {
                continue;
            };
            if envelope.object_key != okey {
                continue;
            }
            if self.refs[i].len() < self.queried {
                continue;
            }
            if !envelope.has_all(&self.refs[i]) {
                continue;
            }
            return Ok((okey, envelope));
        }
        Err(Error::NotFound)
    }
}

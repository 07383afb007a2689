//! Data type registration and lookup.
//!
//! A [`Registry`] maps each application record type to its [`DataType`]
//! descriptor: the type name written into envelopes and index keys, the list
//! of indexed fields, and the payload codec. One registry is created at
//! program start, shared behind an `Arc` by the database and every
//! transaction; registration happens once per type and there is no
//! deregistration.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::fields::{IndexField, ShapeStringer, StringerTable};
use crate::key::{IndexKey, ObjectKey};

/// Owning object placeholder used in extracted index keys before the caller
/// rewrites them to the real object key.
const PLACEHOLDER_USER_KEY: &str = "/x";

/// Descriptor of one registered record type.
pub struct DataType<T> {
    name: String,
    fields: Vec<IndexField<T>>,
    stringers: Arc<StringerTable>,
}

impl<T> DataType<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serializes an object into its stored payload form.
    pub(crate) fn encode(&self, object: &T) -> Result<Bytes> {
        let data = serde_json::to_vec(object)
            .map_err(|e| Error::Encoding(format!("could not encode {} payload: {}", self.name, e)))?;
        Ok(Bytes::from(data))
    }

    /// Deserializes a stored payload back into an object.
    pub(crate) fn decode(&self, data: &[u8]) -> Result<T> {
        serde_json::from_slice(data)
            .map_err(|e| Error::Encoding(format!("could not decode {} payload: {}", self.name, e)))
    }

    /// Deep-copies an object through an encode/decode round trip.
    pub fn clone_object(&self, object: &T) -> Result<T> {
        self.decode(&self.encode(object)?)
    }

    /// The index keys an object contributes, one per indexed field, keyed by
    /// field name and owned by the placeholder object key.
    ///
    /// If any indexed field stringifies to the empty string the object is
    /// indexed under no fields at all and the map is empty.
    pub(crate) fn index_key_map(&self, object: &T) -> Result<HashMap<String, IndexKey>> {
        let placeholder = ObjectKey::new(PLACEHOLDER_USER_KEY)?;
        let mut map = HashMap::with_capacity(self.fields.len());
        for field in &self.fields {
            let value = field.stringify(object, &self.stringers)?;
            if value.is_empty() {
                return Ok(HashMap::new());
            }
            let ikey = IndexKey::new(&placeholder, &self.name, field.name(), &value)?;
            map.insert(field.name().to_string(), ikey);
        }
        Ok(map)
    }

    /// The index keys a lookup exemplar selects, keyed by field name.
    ///
    /// Zero-valued fields do not participate in the query. As with
    /// [`index_key_map`](Self::index_key_map), a participating field that
    /// stringifies empty empties the whole map, which makes the lookup yield
    /// nothing.
    pub(crate) fn query_key_map(&self, exemplar: &T) -> Result<HashMap<String, IndexKey>> {
        let placeholder = ObjectKey::new(PLACEHOLDER_USER_KEY)?;
        let mut map = HashMap::new();
        for field in &self.fields {
            if field.value(exemplar).is_zero() {
                continue;
            }
            let value = field.stringify(exemplar, &self.stringers)?;
            if value.is_empty() {
                return Ok(HashMap::new());
            }
            let ikey = IndexKey::new(&placeholder, &self.name, field.name(), &value)?;
            map.insert(field.name().to_string(), ikey);
        }
        Ok(map)
    }
}

struct Maps {
    by_name: HashMap<String, TypeId>,
    by_type: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

/// Process-wide mapping from record types to their [`DataType`] descriptors,
/// plus the stringer table for user-registered field shapes.
pub struct Registry {
    maps: Mutex<Maps>,
    stringers: Arc<StringerTable>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            maps: Mutex::new(Maps {
                by_name: HashMap::new(),
                by_type: HashMap::new(),
            }),
            stringers: Arc::new(StringerTable::new()),
        }
    }

    /// Registers a record type under `name` with its indexed fields.
    ///
    /// The name must be unique across the registry, and one record type may
    /// not be registered under two names. Each declared field is probed
    /// against the type's default value; a field whose shape no stringifier
    /// or built-in converter can handle is rejected here rather than at
    /// store time.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyExists`] when `name` is taken,
    /// [`Error::InvalidInput`] when the type is already registered under
    /// another name, a field name repeats, or a field shape is unsupported.
    pub fn register_data_type<T>(&self, name: &str, fields: Vec<IndexField<T>>) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Default + Send + Sync + 'static,
    {
        if name.is_empty() {
            return Err(Error::InvalidInput("type name cannot be empty".to_string()));
        }
        let probe = T::default();
        for (i, field) in fields.iter().enumerate() {
            if field.name().is_empty() {
                return Err(Error::InvalidInput("field name cannot be empty".to_string()));
            }
            if fields[..i].iter().any(|f| f.name() == field.name()) {
                return Err(Error::InvalidInput(format!(
                    "field {:?} is declared twice",
                    field.name()
                )));
            }
            field.probe(&probe, &self.stringers)?;
        }

        let mut maps = self.lock_maps()?;
        if maps.by_name.contains_key(name) {
            return Err(Error::AlreadyExists(format!(
                "type name {:?} is already registered",
                name
            )));
        }
        let shape = TypeId::of::<T>();
        if maps.by_type.contains_key(&shape) {
            return Err(Error::InvalidInput(
                "type cannot be registered under multiple names".to_string(),
            ));
        }

        let datatype = Arc::new(DataType {
            name: name.to_string(),
            fields,
            stringers: Arc::clone(&self.stringers),
        });
        maps.by_name.insert(name.to_string(), shape);
        maps.by_type.insert(shape, datatype);
        Ok(())
    }

    /// Registers a stringifier for a field shape the built-in converters do
    /// not cover. Applies to all data types, including already-registered
    /// ones.
    pub fn register_index_stringer<V>(
        &self,
        stringer: impl Fn(&V) -> Result<String> + Send + Sync + 'static,
    ) -> Result<()>
    where
        V: Any + Send,
    {
        let erased: ShapeStringer = Arc::new(move |value: &dyn Any| {
            let value = value.downcast_ref::<V>().ok_or_else(|| {
                Error::Internal("index stringer invoked with mismatched shape".to_string())
            })?;
            stringer(value)
        });
        self.stringers.insert(TypeId::of::<V>(), erased)
    }

    /// Returns the descriptor a type was registered with.
    pub fn lookup<T>(&self) -> Result<Arc<DataType<T>>>
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        let maps = self.lock_maps()?;
        let entry = maps
            .by_type
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "type {} is not registered",
                    std::any::type_name::<T>()
                ))
            })?;
        entry
            .downcast::<DataType<T>>()
            .map_err(|_| Error::Internal("registry entry has mismatched shape".to_string()))
    }

    fn lock_maps(&self) -> Result<std::sync::MutexGuard<'_, Maps>> {
        self.maps
            .lock()
            .map_err(|e| Error::Internal(format!("registry lock poisoned: {}", e)))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

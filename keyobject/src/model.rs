//! The value envelope stored under an object key.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::key::{IndexKey, ObjectKey};
use crate::registry::DataType;

/// Type tag for raw string values written without a registered data type.
pub const STRING_TYPE_NAME: &str = "string";

/// The unit actually stored under an object key: the serialized payload bound
/// to its type name, its own storage key, and the index keys that currently
/// reference it.
///
/// `index_keys` is sorted and duplicate-free; the conjunction filter on reads
/// relies on that for binary search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Envelope {
    pub data: Bytes,
    pub type_name: String,
    pub object_key: ObjectKey,
    pub index_keys: Vec<IndexKey>,
}

impl Envelope {
    /// Builds the envelope for a typed object: encodes the payload, extracts
    /// the index map, and rewrites each entry's owner from the placeholder to
    /// `object_key`.
    pub fn new<T>(object_key: ObjectKey, object: &T, datatype: &DataType<T>) -> Result<Self>
    where
        T: Serialize + DeserializeOwned,
    {
        let data = datatype.encode(object)?;
        let map = datatype.index_key_map(object)?;
        let mut index_keys = Vec::with_capacity(map.len());
        for ikey in map.into_values() {
            index_keys.push(ikey.with_object_key(&object_key)?);
        }
        index_keys.sort();
        index_keys.dedup();
        Ok(Self {
            data,
            type_name: datatype.name().to_string(),
            object_key,
            index_keys,
        })
    }

    /// Wraps a raw string value. String envelopes reference no index keys.
    pub fn new_string(object_key: ObjectKey, value: &str) -> Self {
        Self {
            data: Bytes::copy_from_slice(value.as_bytes()),
            type_name: STRING_TYPE_NAME.to_string(),
            object_key,
            index_keys: Vec::new(),
        }
    }

    /// Whether every key in `ikeys` is referenced by this envelope.
    pub fn has_all(&self, ikeys: &[IndexKey]) -> bool {
        ikeys
            .iter()
            .all(|ikey| self.index_keys.binary_search(ikey).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::fields::IndexField;
    use crate::registry::Registry;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct User {
        name: String,
        age: u32,
    }

    fn registry_with_user() -> Registry {
        let registry = Registry::new();
        registry
            .register_data_type(
                "User",
                vec![IndexField::new("Age", |u: &User| u.age.into())],
            )
            .unwrap();
        registry
    }

    #[test]
    fn should_rewrite_index_keys_to_owning_object() {
        // given
        let registry = registry_with_user();
        let datatype = registry.lookup::<User>().unwrap();
        let okey = ObjectKey::new("/users/alex").unwrap();

        // when
        let envelope = Envelope::new(
            okey.clone(),
            &User {
                name: "alex".to_string(),
                age: 10,
            },
            &datatype,
        )
        .unwrap();

        // then
        assert_eq!(envelope.type_name, "User");
        assert_eq!(envelope.object_key, okey);
        assert_eq!(envelope.index_keys.len(), 1);
        assert_eq!(
            envelope.index_keys[0].as_str(),
            "/ix/User/Age/10/ob/users/alex"
        );
    }

    #[test]
    fn should_wrap_raw_string_without_index_keys() {
        // given
        let okey = ObjectKey::new("/config/motd").unwrap();

        // when
        let envelope = Envelope::new_string(okey.clone(), "hello");

        // then
        assert_eq!(envelope.type_name, STRING_TYPE_NAME);
        assert_eq!(envelope.data, Bytes::from("hello"));
        assert!(envelope.index_keys.is_empty());
    }

    #[test]
    fn should_answer_membership_over_sorted_index_keys() {
        // given
        let okey = ObjectKey::new("/x").unwrap();
        let ik = |v: &str| IndexKey::new(&okey, "T", "F", v).unwrap();
        let envelope = Envelope {
            data: Bytes::new(),
            type_name: "T".to_string(),
            object_key: okey.clone(),
            index_keys: vec![ik("a"), ik("b"), ik("c")],
        };

        // then
        assert!(envelope.has_all(&[]));
        assert!(envelope.has_all(&[ik("b")]));
        assert!(envelope.has_all(&[ik("a"), ik("c")]));
        assert!(!envelope.has_all(&[ik("a"), ik("d")]));
    }
}

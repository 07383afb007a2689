//! Indexed-field declarations and value stringification.
//!
//! A registered type declares which of its fields participate in the
//! secondary index by supplying one [`IndexField`] per field: the field name,
//! an accessor producing the field's [`IndexValue`], and optionally a
//! per-field stringifier that overrides the built-in conversions.
//!
//! Stringification resolves in order: the per-field stringifier, the native
//! converters (booleans, integers, strings), the standard converters (byte
//! sequences as lowercase hex, IP addresses in canonical form), and finally
//! the stringer table for user-registered runtime shapes. A value none of
//! them can handle is an invalid indexed-field shape.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::Write;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

/// The value of one indexed field, as produced by its accessor.
///
/// The named variants cover the shapes the built-in converters understand.
/// Anything else travels as [`IndexValue::Other`] and is resolved through the
/// stringer table registered alongside the data types.
pub enum IndexValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Str(String),
    Bytes(Vec<u8>),
    Ip(IpAddr),
    Other(Box<dyn Any + Send>),
}

impl IndexValue {
    /// Wraps a value of a user-registered shape.
    pub fn other<V: Any + Send>(value: V) -> Self {
        IndexValue::Other(Box::new(value))
    }

    /// Whether this is the zero value of its shape.
    ///
    /// Zero-valued fields of a lookup exemplar do not participate in the
    /// query. `Other` values are never considered zero.
    pub(crate) fn is_zero(&self) -> bool {
        match self {
            IndexValue::Bool(b) => !*b,
            IndexValue::Int(i) => *i == 0,
            IndexValue::UInt(u) => *u == 0,
            IndexValue::Str(s) => s.is_empty(),
            IndexValue::Bytes(b) => b.is_empty(),
            IndexValue::Ip(ip) => ip.is_unspecified(),
            IndexValue::Other(_) => false,
        }
    }
}

macro_rules! index_value_from_int {
    ($variant:ident, $($ty:ty),+) => {
        $(impl From<$ty> for IndexValue {
            fn from(v: $ty) -> Self {
                IndexValue::$variant(v.into())
            }
        })+
    };
}

index_value_from_int!(Int, i8, i16, i32, i64);
index_value_from_int!(UInt, u8, u16, u32, u64);

impl From<bool> for IndexValue {
    fn from(v: bool) -> Self {
        IndexValue::Bool(v)
    }
}

impl From<&str> for IndexValue {
    fn from(v: &str) -> Self {
        IndexValue::Str(v.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(v: String) -> Self {
        IndexValue::Str(v)
    }
}

impl From<Vec<u8>> for IndexValue {
    fn from(v: Vec<u8>) -> Self {
        IndexValue::Bytes(v)
    }
}

impl From<IpAddr> for IndexValue {
    fn from(v: IpAddr) -> Self {
        IndexValue::Ip(v)
    }
}

impl From<Ipv4Addr> for IndexValue {
    fn from(v: Ipv4Addr) -> Self {
        IndexValue::Ip(IpAddr::V4(v))
    }
}

impl From<Ipv6Addr> for IndexValue {
    fn from(v: Ipv6Addr) -> Self {
        IndexValue::Ip(IpAddr::V6(v))
    }
}

/// Stringifier for one user-registered field shape.
pub type ShapeStringer = Arc<dyn Fn(&dyn Any) -> Result<String> + Send + Sync>;

/// Table of stringifiers keyed by the runtime shape of the field value.
///
/// Shared between the registry and every data type registered through it, so
/// a stringer registered later also applies to already-registered types.
pub struct StringerTable {
    stringers: Mutex<HashMap<TypeId, ShapeStringer>>,
}

impl StringerTable {
    pub(crate) fn new() -> Self {
        Self {
            stringers: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(&self, shape: TypeId, stringer: ShapeStringer) -> Result<()> {
        let mut stringers = self
            .stringers
            .lock()
            .map_err(|e| Error::Internal(format!("stringer table lock poisoned: {}", e)))?;
        if stringers.contains_key(&shape) {
            return Err(Error::AlreadyExists(
                "a stringer is already registered for this field shape".to_string(),
            ));
        }
        stringers.insert(shape, stringer);
        Ok(())
    }

    fn lookup(&self, shape: TypeId) -> Result<Option<ShapeStringer>> {
        let stringers = self
            .stringers
            .lock()
            .map_err(|e| Error::Internal(format!("stringer table lock poisoned: {}", e)))?;
        Ok(stringers.get(&shape).cloned())
    }

    pub(crate) fn covers(&self, shape: TypeId) -> Result<bool> {
        Ok(self.lookup(shape)?.is_some())
    }
}

/// Converts an index value to its string form, consulting `table` for
/// user-registered shapes.
pub(crate) fn stringify_value(value: &IndexValue, table: &StringerTable) -> Result<String> {
    match value {
        IndexValue::Bool(b) => Ok(if *b { "true" } else { "false" }.to_string()),
        IndexValue::Int(i) => Ok(i.to_string()),
        IndexValue::UInt(u) => Ok(u.to_string()),
        IndexValue::Str(s) => Ok(s.clone()),
        IndexValue::Bytes(b) => Ok(to_hex(b)),
        IndexValue::Ip(ip) => Ok(ip.to_string()),
        IndexValue::Other(v) => {
            let stringer = table.lookup((**v).type_id())?.ok_or_else(|| {
                Error::InvalidInput(
                    "no stringer registered for indexed field shape".to_string(),
                )
            })?;
            stringer(v.as_ref())
        }
    }
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        // write! to a String cannot fail
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Per-field stringifier, receiving the whole record.
pub type FieldStringer<T> = Arc<dyn Fn(&T) -> Result<String> + Send + Sync>;

/// Declaration of one indexed field of a record type.
pub struct IndexField<T> {
    name: String,
    accessor: fn(&T) -> IndexValue,
    stringer: Option<FieldStringer<T>>,
}

impl<T> IndexField<T> {
    /// Declares an indexed field with the built-in stringification.
    pub fn new(name: &str, accessor: fn(&T) -> IndexValue) -> Self {
        Self {
            name: name.to_string(),
            accessor,
            stringer: None,
        }
    }

    /// Overrides stringification for this field.
    pub fn with_stringer(mut self, stringer: impl Fn(&T) -> Result<String> + Send + Sync + 'static) -> Self {
        self.stringer = Some(Arc::new(stringer));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn value(&self, record: &T) -> IndexValue {
        (self.accessor)(record)
    }

    /// The string form of this field's value in `record`.
    pub(crate) fn stringify(&self, record: &T, table: &StringerTable) -> Result<String> {
        if let Some(stringer) = &self.stringer {
            return stringer(record);
        }
        stringify_value(&self.value(record), table)
    }

    /// Registration-time probe: fails when the field's value in `record` has
    /// a shape that neither a stringifier nor the built-ins can handle.
    pub(crate) fn probe(&self, record: &T, table: &StringerTable) -> Result<()> {
        if self.stringer.is_some() {
            return Ok(());
        }
        if let IndexValue::Other(v) = self.value(record) {
            if !table.covers((*v).type_id())? {
                return Err(Error::InvalidInput(format!(
                    "indexed field {:?} has a shape no stringer can handle",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

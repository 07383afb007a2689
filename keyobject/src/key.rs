//! Object and index key encoding.
//!
//! The layer overlays two keyspaces on the host store's flat ordered
//! keyspace:
//!
//! ```text
//! /ob<user-key>                                      object envelopes
//! /ix/<type>/<field>/<value><object-key>             index entries (empty value)
//! ```
//!
//! User keys are absolute, cleaned paths. The three index segments are
//! percent-escaped so that embedded `/` bytes cannot masquerade as segment
//! separators, which keeps an index key parseable by locating its first five
//! unescaped slashes. Everything from the fifth slash onward is the owning
//! object key.
//!
//! Keys for one `(type, field, value)` triple are contiguous: the owning
//! object key always starts with `/`, and `'0'` is the successor byte of
//! `'/'`, so the half-open range `[prefix + "/", prefix + "0")` covers
//! exactly the index entries sharing the triple.

use std::ops::Bound::{Excluded, Included};

use bytes::Bytes;
use common::BytesRange;

use crate::error::{Error, Result};

/// Keyspace tag for object envelopes.
pub const OBJECT_KEYSPACE: &str = "ob";

/// Keyspace tag for index entries.
pub const INDEX_KEYSPACE: &str = "ix";

/// Storage key of an object: the user key behind the `/ob` keyspace tag.
///
/// The user key `/config/cluster` is stored as `/ob/config/cluster`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Builds the object key for a user key.
    ///
    /// The user key must be an absolute, cleaned path: leading `/`, no empty
    /// or `.`/`..` components, and no trailing slash except for the root.
    pub fn new(user_key: &str) -> Result<Self> {
        if !user_key.starts_with('/') {
            return Err(Error::InvalidInput(format!(
                "key must be an absolute path: {:?}",
                user_key
            )));
        }
        if !is_clean_path(user_key) {
            return Err(Error::InvalidInput(format!(
                "key must be a clean path: {:?}",
                user_key
            )));
        }
        if user_key == "/" {
            return Ok(Self(format!("/{}", OBJECT_KEYSPACE)));
        }
        Ok(Self(format!("/{}{}", OBJECT_KEYSPACE, user_key)))
    }

    /// Accepts a raw storage key previously produced by [`ObjectKey::new`].
    pub fn parse(s: &str) -> Result<Self> {
        let tag = format!("/{}", OBJECT_KEYSPACE);
        if s != tag && !s.starts_with(&format!("{}/", tag)) {
            return Err(Error::InvalidInput(format!("not an object key: {:?}", s)));
        }
        Ok(Self(s.to_string()))
    }

    /// The user key this object key was built from.
    pub fn user_key(&self) -> &str {
        let rest = &self.0[OBJECT_KEYSPACE.len() + 1..];
        if rest.is_empty() { "/" } else { rest }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.0.as_bytes())
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage key of one index entry, encoding the tuple
/// `(type name, field name, field value, owning object key)`.
///
/// An object at `/ob/a/b/c` of type `User` with indexed field `Phone` valued
/// `888-000-1234` contributes the index key
/// `/ix/User/Phone/888-000-1234/ob/a/b/c`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexKey(String);

impl IndexKey {
    /// Builds the index key for one indexed field value of an object.
    pub fn new(
        object_key: &ObjectKey,
        type_name: &str,
        field_name: &str,
        field_value: &str,
    ) -> Result<Self> {
        if type_name.is_empty() || field_name.is_empty() || field_value.is_empty() {
            return Err(Error::InvalidInput(
                "type name, field name and field value cannot be empty".to_string(),
            ));
        }
        Ok(Self(format!(
            "/{}/{}/{}/{}{}",
            INDEX_KEYSPACE,
            escape_segment(type_name),
            escape_segment(field_name),
            escape_segment(field_value),
            object_key.as_str()
        )))
    }

    /// Accepts a raw storage key previously produced by [`IndexKey::new`].
    ///
    /// Validates the five-slash structure, that the escaped segments decode,
    /// and that the trailing object key parses.
    pub fn parse(s: &str) -> Result<Self> {
        let malformed = || Error::InvalidInput(format!("index key format is invalid: {:?}", s));
        if nth_slash(s, 1) != Some(0) {
            return Err(malformed());
        }
        let type_pos = nth_slash(s, 2).ok_or_else(malformed)?;
        let field_pos = nth_slash(s, 3).ok_or_else(malformed)?;
        let value_pos = nth_slash(s, 4).ok_or_else(malformed)?;
        let object_pos = nth_slash(s, 5).ok_or_else(malformed)?;

        if &s[1..type_pos] != INDEX_KEYSPACE {
            return Err(malformed());
        }
        let type_name = &s[type_pos + 1..field_pos];
        let field_name = &s[field_pos + 1..value_pos];
        let field_value = &s[value_pos + 1..object_pos];
        if type_name.is_empty() || field_name.is_empty() || field_value.is_empty() {
            return Err(malformed());
        }
        unescape_segment(type_name)?;
        unescape_segment(field_name)?;
        unescape_segment(field_value)?;
        ObjectKey::parse(&s[object_pos..])?;
        Ok(Self(s.to_string()))
    }

    /// The type name segment, unescaped.
    pub fn type_name(&self) -> Result<String> {
        self.segment(2)
    }

    /// The field name segment, unescaped.
    pub fn field_name(&self) -> Result<String> {
        self.segment(3)
    }

    /// The field value segment, unescaped.
    pub fn field_value(&self) -> Result<String> {
        self.segment(4)
    }

    /// The owning object key.
    pub fn object_key(&self) -> Result<ObjectKey> {
        let p = nth_slash(&self.0, 5).ok_or_else(|| {
            Error::InvalidInput(format!("index key has no object key part: {:?}", self.0))
        })?;
        ObjectKey::parse(&self.0[p..])
    }

    /// Returns this index key with its owning object key replaced.
    pub fn with_object_key(&self, object_key: &ObjectKey) -> Result<Self> {
        let p = nth_slash(&self.0, 5).ok_or_else(|| {
            Error::InvalidInput(format!("index key has no object key part: {:?}", self.0))
        })?;
        Ok(Self(format!("{}{}", &self.0[..p], object_key.as_str())))
    }

    /// The half-open scan range covering every index key that shares this
    /// key's `(type, field, value)` triple, regardless of owning object.
    pub fn scan_range(&self) -> Result<BytesRange> {
        let p = nth_slash(&self.0, 5).ok_or_else(|| {
            Error::InvalidInput(format!("invalid index key: {:?}", self.0))
        })?;
        let begin = Bytes::copy_from_slice(self.0[..=p].as_bytes());
        let mut end = self.0[..p].as_bytes().to_vec();
        end.push(b'/' + 1);
        Ok(BytesRange::new(
            Included(begin),
            Excluded(Bytes::from(end)),
        ))
    }

    fn segment(&self, n: usize) -> Result<String> {
        let missing = || {
            Error::InvalidInput(format!("index key has too few segments: {:?}", self.0))
        };
        let p = nth_slash(&self.0, n).ok_or_else(missing)?;
        let q = nth_slash(&self.0, n + 1).ok_or_else(missing)?;
        unescape_segment(&self.0[p + 1..q])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.0.as_bytes())
    }
}

impl std::fmt::Display for IndexKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Computes deletions and additions needed to move a stored index-key set
/// from `old` to `cur`. Both inputs must be sorted.
pub fn diff_index_keys(old: &[IndexKey], cur: &[IndexKey]) -> (Vec<IndexKey>, Vec<IndexKey>) {
    let additions = cur
        .iter()
        .filter(|k| old.binary_search(k).is_err())
        .cloned()
        .collect();
    let deletions = old
        .iter()
        .filter(|k| cur.binary_search(k).is_err())
        .cloned()
        .collect();
    (deletions, additions)
}

/// Position of the `n`-th `/` in `s` (1-based), if present.
fn nth_slash(s: &str, n: usize) -> Option<usize> {
    if n == 0 {
        return None;
    }
    s.bytes()
        .enumerate()
        .filter(|&(_, b)| b == b'/')
        .nth(n - 1)
        .map(|(i, _)| i)
}

/// Whether `key` is a cleaned absolute path: no empty, `.` or `..`
/// components, no trailing slash except for the root itself.
fn is_clean_path(key: &str) -> bool {
    if key == "/" {
        return true;
    }
    if !key.starts_with('/') || key.ends_with('/') {
        return false;
    }
    key[1..]
        .split('/')
        .all(|part| !part.is_empty() && part != "." && part != "..")
}

const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Bytes that may appear verbatim in an escaped segment: the URL path-segment
/// safe set. Everything else, `/` included, is percent-escaped.
fn is_segment_safe(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'-' | b'_' | b'.' | b'~' | b'$' | b'&' | b'+' | b':' | b'=' | b'@'
        )
}

fn escape_segment(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if is_segment_safe(b) {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX_UPPER[(b >> 4) as usize] as char);
            out.push(HEX_UPPER[(b & 0x0F) as usize] as char);
        }
    }
    out
}

fn unescape_segment(s: &str) -> Result<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len() {
                return Err(Error::InvalidInput(format!(
                    "truncated percent escape in segment: {:?}",
                    s
                )));
            }
            let hi = hex_value(bytes[i + 1]);
            let lo = hex_value(bytes[i + 2]);
            match (hi, lo) {
                (Some(hi), Some(lo)) => out.push((hi << 4) | lo),
                _ => {
                    return Err(Error::InvalidInput(format!(
                        "invalid percent escape in segment: {:?}",
                        s
                    )));
                }
            }
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out)
        .map_err(|e| Error::InvalidInput(format!("segment is not valid UTF-8: {}", e)))
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn should_prefix_user_key_with_object_keyspace() {
        // given
        let okey = ObjectKey::new("/foo").unwrap();

        // then
        assert_eq!(okey.as_str(), "/ob/foo");
        assert_eq!(okey.user_key(), "/foo");
        assert!(ObjectKey::parse(okey.as_str()).is_ok());
    }

    #[test]
    fn should_accept_root_user_key() {
        let okey = ObjectKey::new("/").unwrap();

        assert_eq!(okey.as_str(), "/ob");
        assert_eq!(okey.user_key(), "/");
    }

    #[test]
    fn should_reject_unclean_user_keys() {
        for key in ["relative", "", "/foo/", "/foo//bar", "/foo/./bar", "/foo/../bar", "/."] {
            assert!(
                matches!(ObjectKey::new(key), Err(Error::InvalidInput(_))),
                "key {:?} must be rejected",
                key
            );
        }
    }

    #[test]
    fn should_reject_foreign_storage_keys() {
        assert!(ObjectKey::parse("/ix/T/F/V/ob/x").is_err());
        assert!(ObjectKey::parse("/obfoo").is_err());
        assert!(ObjectKey::parse("ob/foo").is_err());
    }

    #[test]
    fn should_build_index_key_in_canonical_form() {
        // given
        let okey = ObjectKey::new("/x").unwrap();

        // when
        let ikey = IndexKey::new(&okey, "X", "Field", "Value").unwrap();

        // then
        assert_eq!(ikey.as_str(), "/ix/X/Field/Value/ob/x");
        assert!(IndexKey::parse(ikey.as_str()).is_ok());
        assert_eq!(ikey.type_name().unwrap(), "X");
        assert_eq!(ikey.field_name().unwrap(), "Field");
        assert_eq!(ikey.field_value().unwrap(), "Value");
        assert_eq!(ikey.object_key().unwrap(), okey);
    }

    #[test]
    fn should_reject_empty_index_key_segments() {
        let okey = ObjectKey::new("/x").unwrap();

        assert!(IndexKey::new(&okey, "", "Field", "Value").is_err());
        assert!(IndexKey::new(&okey, "X", "", "Value").is_err());
        assert!(IndexKey::new(&okey, "X", "Field", "").is_err());
    }

    #[test]
    fn should_rewrite_owning_object_key() {
        // given
        let ikey = IndexKey::new(&ObjectKey::new("/x").unwrap(), "X", "Field", "Value").unwrap();
        let other = ObjectKey::new("/y").unwrap();

        // when
        let rewritten = ikey.with_object_key(&other).unwrap();

        // then
        assert_eq!(rewritten.as_str(), "/ix/X/Field/Value/ob/y");
        assert_eq!(rewritten.object_key().unwrap(), other);
    }

    #[test]
    fn should_bound_scan_range_by_slash_successor() {
        // given
        let ikey = IndexKey::new(&ObjectKey::new("/y").unwrap(), "X", "Field", "Value").unwrap();

        // when
        let range = ikey.scan_range().unwrap();

        // then
        match (&range.start, &range.end) {
            (std::ops::Bound::Included(begin), std::ops::Bound::Excluded(end)) => {
                assert_eq!(begin.as_ref(), b"/ix/X/Field/Value/");
                assert_eq!(end.as_ref(), b"/ix/X/Field/Value0");
            }
            other => panic!("unexpected range bounds: {:?}", other),
        }
        assert!(range.contains(b"/ix/X/Field/Value/ob/y"));
        assert!(range.contains(b"/ix/X/Field/Value/ob/zzz"));
        assert!(!range.contains(b"/ix/X/Field/Value2/ob/y"));
        assert!(!range.contains(b"/ix/X/Field/Other/ob/y"));
    }

    #[test]
    fn should_escape_slashes_in_all_segments() {
        // given
        let okey = ObjectKey::new("/a/b/c").unwrap();

        // when
        let ikey = IndexKey::new(&okey, "Type/Name", "Field/Name", "Field/Value").unwrap();

        // then
        assert!(IndexKey::parse(ikey.as_str()).is_ok());
        assert_eq!(ikey.type_name().unwrap(), "Type/Name");
        assert_eq!(ikey.field_name().unwrap(), "Field/Name");
        assert_eq!(ikey.field_value().unwrap(), "Field/Value");
        assert_eq!(ikey.object_key().unwrap(), okey);
    }

    #[test]
    fn should_reject_malformed_index_keys() {
        for key in [
            "",
            "/ix",
            "/ix/T",
            "/ix/T/F",
            "/ix/T/F/V",
            "/ix//F/V/ob/x",
            "/ix/T/F/V/zz/x",
            "/zz/T/F/V/ob/x",
            "ix/T/F/V/ob/x",
            "/ix/T/F/%G0/ob/x",
            "/ix/T/F/%2/ob/x",
        ] {
            assert!(IndexKey::parse(key).is_err(), "key {:?} must be rejected", key);
        }
    }

    #[test]
    fn should_diff_sorted_index_key_sets() {
        // given
        let okey = ObjectKey::new("/x").unwrap();
        let ik = |v: &str| IndexKey::new(&okey, "T", "F", v).unwrap();
        let old = vec![ik("a"), ik("b"), ik("c")];
        let cur = vec![ik("b"), ik("c"), ik("d")];

        // when
        let (deletions, additions) = diff_index_keys(&old, &cur);

        // then
        assert_eq!(deletions, vec![ik("a")]);
        assert_eq!(additions, vec![ik("d")]);
    }

    #[test]
    fn should_find_nth_slash_position() {
        assert_eq!(nth_slash("/a/b/c", 0), None);
        assert_eq!(nth_slash("/a/b/c", 1), Some(0));
        assert_eq!(nth_slash("/a/b/c/d/e/f", 2), Some(2));
        assert_eq!(nth_slash("a/b/c/d/e/f", 3), Some(5));
        assert_eq!(nth_slash("/a/b/c", 4), None);
    }

    proptest! {
        #[test]
        fn should_roundtrip_user_keys(parts in prop::collection::vec("[a-z0-9._-]{1,8}", 1..5)) {
            prop_assume!(parts.iter().all(|p| p != "." && p != ".."));
            let user_key = format!("/{}", parts.join("/"));

            let okey = ObjectKey::new(&user_key).unwrap();

            prop_assert_eq!(okey.user_key(), user_key.as_str());
            prop_assert_eq!(ObjectKey::parse(okey.as_str()).unwrap(), okey);
        }

        #[test]
        fn should_roundtrip_index_key_components(t: String, f: String, v: String) {
            prop_assume!(!t.is_empty() && !f.is_empty() && !v.is_empty());
            let okey = ObjectKey::new("/a/b").unwrap();

            let ikey = IndexKey::new(&okey, &t, &f, &v).unwrap();
            let parsed = IndexKey::parse(ikey.as_str()).unwrap();

            prop_assert_eq!(&parsed, &ikey);
            prop_assert_eq!(parsed.type_name().unwrap(), t);
            prop_assert_eq!(parsed.field_name().unwrap(), f);
            prop_assert_eq!(parsed.field_value().unwrap(), v);
            prop_assert_eq!(parsed.object_key().unwrap(), okey);
        }

        #[test]
        fn should_diff_to_recoverable_partition(
            old_vals in prop::collection::btree_set("[a-z]{1,4}", 0..8),
            cur_vals in prop::collection::btree_set("[a-z]{1,4}", 0..8),
        ) {
            let okey = ObjectKey::new("/x").unwrap();
            let to_keys = |vals: &std::collections::BTreeSet<String>| -> Vec<IndexKey> {
                vals.iter().map(|v| IndexKey::new(&okey, "T", "F", v).unwrap()).collect()
            };
            let old = to_keys(&old_vals);
            let cur = to_keys(&cur_vals);

            let (deletions, additions) = diff_index_keys(&old, &cur);

            let kept: Vec<IndexKey> =
                old.iter().filter(|k| cur.binary_search(k).is_ok()).cloned().collect();
            let mut rebuilt_cur = kept.clone();
            rebuilt_cur.extend(additions.iter().cloned());
            rebuilt_cur.sort();
            let mut rebuilt_old = kept;
            rebuilt_old.extend(deletions.iter().cloned());
            rebuilt_old.sort();
            prop_assert_eq!(rebuilt_cur, cur);
            prop_assert_eq!(rebuilt_old, old);
        }
    }
}

//! Binary encoding of stored envelopes.
//!
//! Envelopes are written in a length-prefixed binary layout:
//!
//! ```text
//! | version (u8) | type_name: u16 len + utf8 | object_key: u16 len + utf8 |
//! | data: u32 len + bytes | index_keys: u16 count, each u16 len + utf8 |
//! ```
//!
//! All length prefixes are little-endian. Decoding validates the version,
//! that the self-referencing object key parses, and that every index key
//! parses; an envelope that fails any of those is rejected rather than
//! partially accepted.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::key::{IndexKey, ObjectKey};
use crate::model::Envelope;

/// Envelope format version (currently 0x01).
pub(crate) const VALUE_VERSION: u8 = 0x01;

/// Encodes an envelope into its stored form.
pub(crate) fn encode_envelope(envelope: &Envelope) -> Bytes {
    let mut buf = BytesMut::with_capacity(
        1 + 2 + envelope.type_name.len() + 2 + envelope.object_key.as_str().len() + 4
            + envelope.data.len(),
    );
    buf.put_u8(VALUE_VERSION);
    encode_utf8(&envelope.type_name, &mut buf);
    encode_utf8(envelope.object_key.as_str(), &mut buf);
    encode_bytes(&envelope.data, &mut buf);
    if envelope.index_keys.len() > u16::MAX as usize {
        panic!("too many index keys: {}", envelope.index_keys.len());
    }
    buf.put_u16_le(envelope.index_keys.len() as u16);
    for ikey in &envelope.index_keys {
        encode_utf8(ikey.as_str(), &mut buf);
    }
    buf.freeze()
}

/// Decodes a stored envelope, validating its self-references.
pub(crate) fn decode_envelope(stored: &[u8]) -> Result<Envelope> {
    let mut buf = stored;
    if buf.is_empty() {
        return Err(Error::Encoding("envelope is empty".to_string()));
    }
    if buf[0] != VALUE_VERSION {
        return Err(Error::Encoding(format!(
            "invalid envelope version: expected 0x{:02x}, got 0x{:02x}",
            VALUE_VERSION, buf[0]
        )));
    }
    buf = &buf[1..];

    let type_name = decode_utf8(&mut buf)?;
    let object_key = decode_utf8(&mut buf)?;
    let object_key = ObjectKey::parse(&object_key)
        .map_err(|e| Error::Encoding(format!("envelope has no object key reference: {}", e)))?;
    let data = decode_bytes(&mut buf)?;

    if buf.len() < 2 {
        return Err(Error::Encoding(
            "buffer too short for index key count".to_string(),
        ));
    }
    let count = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    buf = &buf[2..];
    let mut index_keys = Vec::with_capacity(count);
    for _ in 0..count {
        let raw = decode_utf8(&mut buf)?;
        let ikey = IndexKey::parse(&raw)
            .map_err(|e| Error::Encoding(format!("envelope has bad index key: {}", e)))?;
        index_keys.push(ikey);
    }

    if !buf.is_empty() {
        return Err(Error::Encoding(format!(
            "envelope has {} trailing bytes",
            buf.len()
        )));
    }

    Ok(Envelope {
        data,
        type_name,
        object_key,
        index_keys,
    })
}

/// Encodes a UTF-8 string as `len: u16` (little-endian) + bytes.
///
/// Panics if the string exceeds `u16::MAX` bytes; keys and type names are
/// orders of magnitude below that.
fn encode_utf8(s: &str, buf: &mut BytesMut) {
    let bytes = s.as_bytes();
    if bytes.len() > u16::MAX as usize {
        panic!("string too long for envelope encoding: {} bytes", bytes.len());
    }
    buf.put_u16_le(bytes.len() as u16);
    buf.extend_from_slice(bytes);
}

fn decode_utf8(buf: &mut &[u8]) -> Result<String> {
    if buf.len() < 2 {
        return Err(Error::Encoding(
            "buffer too short for string length".to_string(),
        ));
    }
    let len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    *buf = &buf[2..];
    if buf.len() < len {
        return Err(Error::Encoding(format!(
            "buffer too short for string payload: need {} bytes, have {}",
            len,
            buf.len()
        )));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    String::from_utf8(head.to_vec())
        .map_err(|e| Error::Encoding(format!("invalid UTF-8 in envelope: {}", e)))
}

/// Encodes an opaque payload as `len: u32` (little-endian) + bytes.
fn encode_bytes(data: &[u8], buf: &mut BytesMut) {
    if data.len() > u32::MAX as usize {
        panic!("payload too long for envelope encoding: {} bytes", data.len());
    }
    buf.put_u32_le(data.len() as u32);
    buf.extend_from_slice(data);
}

fn decode_bytes(buf: &mut &[u8]) -> Result<Bytes> {
    if buf.len() < 4 {
        return Err(Error::Encoding(
            "buffer too short for payload length".to_string(),
        ));
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    *buf = &buf[4..];
    if buf.len() < len {
        return Err(Error::Encoding(format!(
            "buffer too short for payload: need {} bytes, have {}",
            len,
            buf.len()
        )));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(Bytes::copy_from_slice(head))
}

//! Record Codec
//!
//! A record is laid out as follows (all integers little-endian):
//!
//! ```text
//! u32  record_length     bytes following this field
//! u32  primary_key
//! u16  field_count
//! repeated field_count times:
//!   u8   name_length
//!   ..   name bytes
//!   u8   type_tag
//!   ..   tag-dependent payload
//! ```
//!
//! Payloads by tag:
//!
//! ```text
//! 0 null      (none)
//! 1 bool      u8 0|1
//! 2 int64     i64
//! 3 float64   f64
//! 4 string    u32 n + n bytes
//! 5 bytes     u32 n + n bytes
//! 6 json      u32 n + n bytes (fallback)
//! ```
//!
//! Fields are written in the row's iteration order, which is not deterministic.

use std::io;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use strum::{Display, FromRepr};
use thiserror::Error;

use crate::record::{Item, Row, Value};

/// Size of the record length prefix.
pub const LENGTH_PREFIX: usize = 4;

/// Most fields a single record may carry.
pub const MAX_FIELDS: usize = u16::MAX as usize;

/// Longest permitted field name, in bytes.
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// Longest string, bytes or fallback payload, in bytes.
pub const MAX_PAYLOAD_LEN: usize = u32::MAX as usize;

/// Wire type tags.
#[derive(Clone, Copy, Debug, Display, FromRepr, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum Tag {
    /// No payload.
    Null = 0,
    /// One byte, 0 or 1.
    Bool = 1,
    /// Signed 64 bit integer.
    Int = 2,
    /// IEEE-754 64 bit float.
    Float = 3,
    /// Length prefixed UTF-8.
    String = 4,
    /// Length prefixed opaque bytes.
    Bytes = 5,
    /// Length prefixed JSON.
    Json = 6,
}

/// Codec specific errors.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Row has more fields than a u16 can count
    #[error("too many fields: {0}")]
    TooManyFields(usize),

    /// Field name does not fit a u8 length
    #[error("field name too long ({len}): {name:?}")]
    FieldNameTooLong {
        /// The offending name
        name: String,
        /// Its length in bytes
        len: usize,
    },

    /// Payload does not fit a u32 length
    #[error("field {field:?}: {tag} payload too large ({len})")]
    PayloadTooLarge {
        /// Field name
        field: String,
        /// Payload type
        tag: Tag,
        /// Payload length in bytes
        len: usize,
    },

    /// Encoded record does not fit a u32 length
    #[error("record too large: {0}")]
    RecordTooLarge(usize),

    /// Primary key does not fit the u32 wire field
    #[error("primary key out of range: {0}")]
    PrimaryKeyOutOfRange(i64),

    /// Unsigned value larger than i64::MAX
    #[error("unsigned value too large for int64: {0}")]
    UnsignedOverflow(u64),

    /// Fallback serialization failed
    #[error("field {field:?}: fallback encoding failed: {source}")]
    Fallback {
        /// Field name
        field: String,
        /// Underlying failure
        #[source]
        source: serde_json::Error,
    },

    /// Ran out of bytes mid record
    #[error("record truncated reading {0}")]
    Truncated(&'static str),

    /// Tag byte is not one we know
    #[error("unknown type tag: {0}")]
    UnknownTag(u8),

    /// Name or string is not UTF-8
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),

    /// Declared length disagrees with the bytes present
    #[error("record length mismatch: declared {declared}, found {actual}")]
    LengthMismatch {
        /// Length from the prefix
        declared: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// Writing encoded bytes failed
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Fallback payload is not valid JSON
    #[error("fallback decoding failed: {0}")]
    FallbackDecode(#[source] serde_json::Error),
}

/// The wire form of a primary key. Only keys in `0..=u32::MAX` can be written.
pub fn wire_primary_key(pk: i64) -> Result<u32, CodecError> {
    u32::try_from(pk).map_err(|_| CodecError::PrimaryKeyOutOfRange(pk))
}

/// Encode a full record, length prefix included.
pub fn encode(item: &Item) -> Result<Vec<u8>, CodecError> {
    let mut body = Vec::new();
    encode_body_into(&mut body, item)?;
    let len = u32::try_from(body.len()).map_err(|_| CodecError::RecordTooLarge(body.len()))?;
    let mut out = Vec::with_capacity(LENGTH_PREFIX + body.len());
    out.write_u32::<LittleEndian>(len)?;
    out.extend_from_slice(&body);
    Ok(out)
}

/// Append the record body (everything after the length prefix) to `dst`.
///
/// On error `dst` may hold a partial body and must be discarded by the caller.
pub fn encode_body_into(dst: &mut Vec<u8>, item: &Item) -> Result<(), CodecError> {
    dst.write_u32::<LittleEndian>(wire_primary_key(item.pk)?)?;

    if item.row.len() > MAX_FIELDS {
        return Err(CodecError::TooManyFields(item.row.len()));
    }
    dst.write_u16::<LittleEndian>(item.row.len() as u16)?;

    for (name, value) in &item.row {
        if name.len() > MAX_NAME_LEN {
            return Err(CodecError::FieldNameTooLong {
                name: name.clone(),
                len: name.len(),
            });
        }
        dst.write_u8(name.len() as u8)?;
        dst.extend_from_slice(name.as_bytes());
        encode_value_into(dst, name, value)?;
    }
    Ok(())
}

fn encode_value_into(dst: &mut Vec<u8>, field: &str, value: &Value) -> Result<(), CodecError> {
    dst.write_u8(value.tag() as u8)?;
    match value {
        Value::Null => {}
        Value::Bool(b) => dst.write_u8(u8::from(*b))?,
        Value::Int(i) => dst.write_i64::<LittleEndian>(*i)?,
        Value::Float(f) => dst.write_f64::<LittleEndian>(*f)?,
        Value::String(s) => append_sized(dst, field, Tag::String, s.as_bytes())?,
        Value::Bytes(b) => append_sized(dst, field, Tag::Bytes, b)?,
        Value::Other(v) => {
            let json = serde_json::to_vec(v).map_err(|source| CodecError::Fallback {
                field: field.to_string(),
                source,
            })?;
            append_sized(dst, field, Tag::Json, &json)?;
        }
    }
    Ok(())
}

fn append_sized(dst: &mut Vec<u8>, field: &str, tag: Tag, bytes: &[u8]) -> Result<(), CodecError> {
    let len = u32::try_from(bytes.len()).map_err(|_| CodecError::PayloadTooLarge {
        field: field.to_string(),
        tag,
        len: bytes.len(),
    })?;
    dst.write_u32::<LittleEndian>(len)?;
    dst.extend_from_slice(bytes);
    Ok(())
}

/// Decode a full record, length prefix included.
pub fn decode(bytes: &[u8]) -> Result<Item, CodecError> {
    let mut cursor = bytes;
    let declared = read_u32(&mut cursor, "record length")? as usize;
    if declared != cursor.len() {
        return Err(CodecError::LengthMismatch {
            declared,
            actual: cursor.len(),
        });
    }
    decode_body(cursor)
}

/// Decode a record body (everything after the length prefix).
pub fn decode_body(bytes: &[u8]) -> Result<Item, CodecError> {
    let mut cursor = bytes;
    let pk = i64::from(read_u32(&mut cursor, "primary key")?);
    let count = cursor
        .read_u16::<LittleEndian>()
        .map_err(truncated("field count"))? as usize;

    let mut row = Row::with_capacity(count);
    for _ in 0..count {
        let name_len = cursor.read_u8().map_err(truncated("name length"))? as usize;
        let name = take(&mut cursor, name_len, "name")?;
        let name = std::str::from_utf8(name)
            .map_err(|_| CodecError::InvalidUtf8("field name"))?
            .to_string();
        let value = decode_value(&mut cursor)?;
        row.insert(name, value);
    }

    if !cursor.is_empty() {
        return Err(CodecError::LengthMismatch {
            declared: bytes.len() - cursor.len(),
            actual: bytes.len(),
        });
    }
    Ok(Item::new(pk, row))
}

fn decode_value(cursor: &mut &[u8]) -> Result<Value, CodecError> {
    let raw = cursor.read_u8().map_err(truncated("type tag"))?;
    let tag = Tag::from_repr(raw).ok_or(CodecError::UnknownTag(raw))?;
    let value = match tag {
        Tag::Null => Value::Null,
        Tag::Bool => Value::Bool(cursor.read_u8().map_err(truncated("bool"))? != 0),
        Tag::Int => Value::Int(
            cursor
                .read_i64::<LittleEndian>()
                .map_err(truncated("int64"))?,
        ),
        Tag::Float => Value::Float(
            cursor
                .read_f64::<LittleEndian>()
                .map_err(truncated("float64"))?,
        ),
        Tag::String => {
            let bytes = read_sized(cursor, "string")?;
            let s = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8("string"))?;
            Value::String(s.to_string())
        }
        Tag::Bytes => Value::Bytes(read_sized(cursor, "bytes")?.to_vec()),
        Tag::Json => {
            let bytes = read_sized(cursor, "json")?;
            Value::Other(serde_json::from_slice(bytes).map_err(CodecError::FallbackDecode)?)
        }
    };
    Ok(value)
}

fn read_u32(cursor: &mut &[u8], what: &'static str) -> Result<u32, CodecError> {
    cursor.read_u32::<LittleEndian>().map_err(truncated(what))
}

fn read_sized<'a>(cursor: &mut &'a [u8], what: &'static str) -> Result<&'a [u8], CodecError> {
    let len = read_u32(cursor, what)? as usize;
    take(cursor, len, what)
}

fn take<'a>(cursor: &mut &'a [u8], n: usize, what: &'static str) -> Result<&'a [u8], CodecError> {
    if cursor.len() < n {
        return Err(CodecError::Truncated(what));
    }
    let (head, tail) = cursor.split_at(n);
    *cursor = tail;
    Ok(head)
}

fn truncated(what: &'static str) -> impl Fn(io::Error) -> CodecError {
    move |_| CodecError::Truncated(what)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: Vec<(&str, Value)>) -> Row {
        fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn it_round_trips_bool_and_float() {
        let item = Item::new(
            42,
            row(vec![("active", Value::Bool(true)), ("score", Value::Float(3.5))]),
        );
        let bytes = encode(&item).expect("encodes");
        let decoded = decode(&bytes).expect("decodes");
        assert_eq!(decoded.pk, 42);
        assert_eq!(decoded.row.get("active"), Some(&Value::Bool(true)));
        assert_eq!(decoded.row.get("score"), Some(&Value::Float(3.5)));
        assert_eq!(decoded, item);
    }

    #[test]
    fn it_round_trips_every_tag() {
        let item = Item::new(
            7,
            row(vec![
                ("n", Value::Null),
                ("b", Value::Bool(false)),
                ("i", Value::Int(-9_000_000_000)),
                ("f", Value::Float(-0.25)),
                ("s", Value::from("hello")),
                ("raw", Value::from(vec![0u8, 1, 255])),
                ("nested", Value::Other(serde_json::json!({"a": [1, 2, 3]}))),
            ]),
        );
        let decoded = decode(&encode(&item).expect("encodes")).expect("decodes");
        for (name, value) in &item.row {
            let other = decoded.row.get(name).expect("field present");
            assert_eq!(other, value);
            assert_eq!(other.tag(), value.tag());
        }
        assert_eq!(decoded.row.len(), item.row.len());
    }

    #[test]
    fn it_lays_out_a_record() {
        let item = Item::new(1, row(vec![("a", Value::Bool(true))]));
        let bytes = encode(&item).expect("encodes");
        // pk(4) + count(2) + name_len(1) + "a"(1) + tag(1) + bool(1)
        assert_eq!(&bytes[..4], &10u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(&bytes[8..10], &1u16.to_le_bytes());
        assert_eq!(&bytes[10..], &[1, b'a', Tag::Bool as u8, 1]);
    }

    #[test]
    fn it_rejects_long_field_names() {
        let name = "x".repeat(MAX_NAME_LEN + 1);
        let item = Item::new(1, row(vec![(name.as_str(), Value::Null)]));
        let err = encode(&item).expect_err("name too long");
        assert!(matches!(err, CodecError::FieldNameTooLong { len: 256, .. }));
    }

    #[test]
    fn it_accepts_max_length_field_names() {
        let name = "y".repeat(MAX_NAME_LEN);
        let item = Item::new(1, row(vec![(name.as_str(), Value::Int(1))]));
        let decoded = decode(&encode(&item).expect("encodes")).expect("decodes");
        assert_eq!(decoded, item);
    }

    #[test]
    fn it_rejects_too_many_fields() {
        let row: Row = (0..=MAX_FIELDS)
            .map(|i| (i.to_string(), Value::Null))
            .collect();
        let err = encode(&Item::new(1, row)).expect_err("too many fields");
        assert!(matches!(err, CodecError::TooManyFields(65_536)));
    }

    #[test]
    fn it_rejects_primary_keys_outside_the_wire_field() {
        let err = encode(&Item::new(-1, Row::new())).expect_err("negative");
        assert!(matches!(err, CodecError::PrimaryKeyOutOfRange(-1)));
        let err = encode(&Item::new(i64::from(u32::MAX) + 1, Row::new())).expect_err("too big");
        assert!(matches!(err, CodecError::PrimaryKeyOutOfRange(_)));
    }

    #[test]
    fn it_detects_truncation() {
        let item = Item::new(3, row(vec![("s", Value::from("truncate me"))]));
        let bytes = encode(&item).expect("encodes");
        let err = decode_body(&bytes[LENGTH_PREFIX..bytes.len() - 2]).expect_err("short");
        assert!(matches!(err, CodecError::Truncated("string")));
        let err = decode(&bytes[..bytes.len() - 1]).expect_err("short");
        assert!(matches!(err, CodecError::LengthMismatch { .. }));
    }

    #[test]
    fn it_rejects_unknown_tags() {
        let mut body = Vec::new();
        body.extend_from_slice(&9u32.to_le_bytes());
        body.extend_from_slice(&1u16.to_le_bytes());
        body.extend_from_slice(&[1, b'z', 42]);
        let err = decode_body(&body).expect_err("bad tag");
        assert!(matches!(err, CodecError::UnknownTag(42)));
    }
}

//! Input decoding
//!
//! Each input line is a JSON object. Field order matters only in that the first field is the
//! primary key; the rest become the row.

use thiserror::Error;

use crate::codec;
use crate::record::{Item, Row, Value};

/// Input specific errors.
#[derive(Error, Debug)]
pub enum InputError {
    /// Not valid JSON
    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Valid JSON, but not an object
    #[error("record is not a JSON object")]
    NotAnObject,

    /// An object without fields has no primary key
    #[error("record has no fields")]
    Empty,

    /// First field is not an integer
    #[error("primary key {field:?}: {reason}")]
    PrimaryKey {
        /// Name of the first field
        field: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Parse one line into its fields, in the order they appear.
pub fn decode_line(line: &str) -> Result<Vec<(String, Value)>, InputError> {
    let serde_json::Value::Object(map) = serde_json::from_str::<serde_json::Value>(line)? else {
        return Err(InputError::NotAnObject);
    };
    Ok(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
}

/// Split ordered fields into an item. The first field is the primary key and is not kept in
/// the row.
pub fn into_item(fields: Vec<(String, Value)>) -> Result<Item, InputError> {
    let mut fields = fields.into_iter();
    let (name, value) = fields.next().ok_or(InputError::Empty)?;
    let pk = coerce_primary_key(&name, &value)?;
    let row: Row = fields.collect();
    Ok(Item::new(pk, row))
}

/// Interpret a value as an integer primary key.
///
/// Integers pass through, floats must be integral and in range, strings must parse as a
/// base 10 integer. Anything else is rejected, as is any key which cannot be written to a
/// segment.
pub fn coerce_primary_key(field: &str, value: &Value) -> Result<i64, InputError> {
    let reject = |reason: String| InputError::PrimaryKey {
        field: field.to_string(),
        reason,
    };
    let pk = match value {
        Value::Int(i) => Ok(*i),
        Value::Float(f) => {
            // i64::MAX as f64 rounds up to 2^63, hence the strict upper bound
            if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 {
                Ok(*f as i64)
            } else {
                Err(reject(format!("float is not an integer: {f}")))
            }
        }
        Value::String(s) => s
            .parse::<i64>()
            .map_err(|e| reject(format!("string not an int: {e}"))),
        other => Err(reject(format!("unsupported type {}", other.tag()))),
    }?;
    codec::wire_primary_key(pk).map_err(|e| reject(e.to_string()))?;
    Ok(pk)
}

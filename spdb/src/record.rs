//! Record Types
//!
//! An [`Item`] is a primary key plus a [`Row`] of named, typed [`Value`]s.

use std::collections::HashMap;

use crate::codec::CodecError;
use crate::codec::Tag;

/// The named fields of an item.
///
/// Field iteration order is unspecified and is not stable across encodes.
pub type Row = HashMap<String, Value>;

/// One logical record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Item {
    /// Primary key, unique within one index.
    pub pk: i64,
    /// Everything except the primary key.
    pub row: Row,
}

impl Item {
    /// Create a new item.
    pub fn new(pk: i64, row: Row) -> Self {
        Self { pk, row }
    }
}

/// A typed field value.
///
/// Every variant except [`Value::Other`] has a native wire tag. `Other` holds anything that
/// must be carried through the generic structured (JSON) encoding.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// No value.
    Null,
    /// A boolean.
    Bool(bool),
    /// Any integer that fits in 64 signed bits.
    Int(i64),
    /// A 64 bit float.
    Float(f64),
    /// UTF-8 text.
    String(String),
    /// Opaque bytes.
    Bytes(Vec<u8>),
    /// Fallback, stored as JSON.
    Other(serde_json::Value),
}

impl Value {
    /// The wire tag this value encodes with.
    pub fn tag(&self) -> Tag {
        match self {
            Value::Null => Tag::Null,
            Value::Bool(_) => Tag::Bool,
            Value::Int(_) => Tag::Int,
            Value::Float(_) => Tag::Float,
            Value::String(_) => Tag::String,
            Value::Bytes(_) => Tag::Bytes,
            Value::Other(_) => Tag::Json,
        }
    }

    /// Convert into a JSON value, for display.
    ///
    /// Bytes become an array of numbers.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::from(b.clone()),
            Value::Other(v) => v.clone(),
        }
    }
}

macro_rules! value_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::Int(i64::from(v))
                }
            }
        )*
    };
}

value_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<isize> for Value {
    fn from(v: isize) -> Self {
        // isize is at most 64 bits on every supported target
        Value::Int(v as i64)
    }
}

impl TryFrom<u64> for Value {
    type Error = CodecError;

    fn try_from(v: u64) -> Result<Self, Self::Error> {
        i64::try_from(v)
            .map(Value::Int)
            .map_err(|_| CodecError::UnsignedOverflow(v))
    }
}

impl TryFrom<usize> for Value {
    type Error = CodecError;

    fn try_from(v: usize) -> Result<Self, Self::Error> {
        Value::try_from(v as u64)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if n.is_f64() {
                    // is_f64() means "not representable as an integer"
                    n.as_f64()
                        .map(Value::Float)
                        .unwrap_or(Value::Other(serde_json::Value::Number(n)))
                } else {
                    // Unsigned beyond i64: keep the exact digits.
                    Value::Other(serde_json::Value::Number(n))
                }
            }
            other => Value::Other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_normalizes_integer_widths() {
        assert_eq!(Value::from(7u8), Value::Int(7));
        assert_eq!(Value::from(-7i16), Value::Int(-7));
        assert_eq!(Value::from(u32::MAX), Value::Int(u32::MAX as i64));
        assert_eq!(Value::try_from(12u64).expect("fits"), Value::Int(12));
    }

    #[test]
    fn it_rejects_oversized_unsigned() {
        let err = Value::try_from(u64::MAX).expect_err("too large");
        assert!(matches!(err, CodecError::UnsignedOverflow(u64::MAX)));
    }

    #[test]
    fn it_converts_json_values() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"a": 1, "b": 2.5, "c": "x", "d": [1, 2], "e": null}"#)
                .expect("parses");
        let obj = json.as_object().expect("object");
        assert_eq!(Value::from(obj["a"].clone()), Value::Int(1));
        assert_eq!(Value::from(obj["b"].clone()), Value::Float(2.5));
        assert_eq!(Value::from(obj["c"].clone()), Value::String("x".to_string()));
        assert_eq!(Value::from(obj["e"].clone()), Value::Null);
        assert_eq!(Value::from(obj["d"].clone()).tag(), Tag::Json);
    }

    #[test]
    fn it_keeps_huge_unsigned_json_exact() {
        let json: serde_json::Value = serde_json::from_str("18446744073709551615").expect("parses");
        let value = Value::from(json.clone());
        assert_eq!(value, Value::Other(json));
    }
}

//! Column values shared by the changeset decoder and the live database
//!
//! Values read from a changeset record and values read from the target row
//! use the same representation, so rendering and comparison never need to
//! know where a value came from.

use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};

/// Dynamic column value (sqlite3_value)
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    /// Text as stored; the bytes are not guaranteed to be valid UTF-8
    Text(Vec<u8>),
    Blob(Vec<u8>),
}

/// Placeholder printed for a value that is not present
pub const ABSENT: &str = "-";

impl Value {
    /// Type-aware equality used for pre-image checks.
    ///
    /// Integers and reals compare numerically, text and blobs byte-for-byte,
    /// NULL only equals NULL. Any other pairing is unequal.
    pub fn matches(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => a == b,
            (Value::Integer(i), Value::Real(r)) | (Value::Real(r), Value::Integer(i)) => {
                int_equals_real(*i, *r)
            }
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Blob(a), Value::Blob(b)) => a == b,
            _ => false,
        }
    }

    /// Display form for conflict reports
    pub fn render(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Real(f) => format!("{:.6}", f),
            Value::Text(s) => format!("\"{}\"", String::from_utf8_lossy(s)),
            Value::Blob(b) => format!("<blob({})>", b.len()),
        }
    }
}

/// Render an optional value, printing [`ABSENT`] when there is none
pub fn render(value: Option<&Value>) -> String {
    value.map_or_else(|| ABSENT.to_string(), Value::render)
}

fn int_equals_real(i: i64, r: f64) -> bool {
    // 2^63 is exactly representable; anything at or beyond it cannot be an i64
    if r.fract() != 0.0 || !(-9.223_372_036_854_776e18..9.223_372_036_854_776e18).contains(&r) {
        return false;
    }
    r as i64 == i
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) => Value::Text(t.to_vec()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(match self {
            Value::Null => ValueRef::Null,
            Value::Integer(i) => ValueRef::Integer(*i),
            Value::Real(f) => ValueRef::Real(*f),
            Value::Text(s) => ValueRef::Text(s),
            Value::Blob(b) => ValueRef::Blob(b),
        }))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v.into_bytes())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Blob(v.to_vec())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

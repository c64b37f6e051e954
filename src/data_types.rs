use std::cmp::Ordering;
use std::fmt;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub type DatabaseId = i64;
pub type TableId = i64;
pub type IndexId = i64;
pub type TableColumnId = i64;

/// Physical type of a column.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
pub enum ColumnType {
    Int32,
    Int64,
    Float64,
    String,
    Bool,
    /// Microseconds since the Unix epoch
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub r#type: ColumnType,
    #[serde(default)]
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, r#type: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            r#type,
            nullable,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ShardId(pub u32);

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard-{}", self.0)
    }
}

/// A single cell of a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bool(bool),
    Timestamp(i64),
}

// Tags of the canonical key encoding
const TAG_NULL: u8 = 0;
const TAG_INT32: u8 = 1;
const TAG_INT64: u8 = 2;
const TAG_FLOAT64: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_BOOL: u8 = 5;
const TAG_TIMESTAMP: u8 = 6;

const CANONICAL_NAN: u64 = 0x7ff8_0000_0000_0000;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The column type this value belongs to, `None` for nulls.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Int32(_) => Some(ColumnType::Int32),
            Value::Int64(_) => Some(ColumnType::Int64),
            Value::Float64(_) => Some(ColumnType::Float64),
            Value::String(_) => Some(ColumnType::String),
            Value::Bool(_) => Some(ColumnType::Bool),
            Value::Timestamp(_) => Some(ColumnType::Timestamp),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self.column_type() {
            Some(ColumnType::Int32) => "Int32",
            Some(ColumnType::Int64) => "Int64",
            Some(ColumnType::Float64) => "Float64",
            Some(ColumnType::String) => "String",
            Some(ColumnType::Bool) => "Bool",
            Some(ColumnType::Timestamp) => "Timestamp",
            None => "Null",
        }
    }

    /// Append the canonical byte encoding of this value to `buf`.
    ///
    /// The encoding is a one byte type tag followed by a fixed-width big-endian
    /// payload (strings are length-prefixed). Values that compare equal encode
    /// identically: `-0.0` is written as `0.0` and every NaN as the same quiet NaN.
    pub fn encode_key(&self, buf: &mut Vec<u8>) {
        match self {
            Value::Null => buf.push(TAG_NULL),
            Value::Int32(v) => {
                buf.push(TAG_INT32);
                buf.extend_from_slice(&v.to_be_bytes());
            }
            Value::Int64(v) => {
                buf.push(TAG_INT64);
                buf.extend_from_slice(&v.to_be_bytes());
            }
            Value::Float64(v) => {
                buf.push(TAG_FLOAT64);
                let bits = if v.is_nan() {
                    CANONICAL_NAN
                } else if *v == 0.0 {
                    0
                } else {
                    v.to_bits()
                };
                buf.extend_from_slice(&bits.to_be_bytes());
            }
            Value::String(v) => {
                buf.push(TAG_STRING);
                buf.extend_from_slice(&(v.len() as u64).to_be_bytes());
                buf.extend_from_slice(v.as_bytes());
            }
            Value::Bool(v) => {
                buf.push(TAG_BOOL);
                buf.push(u8::from(*v));
            }
            Value::Timestamp(v) => {
                buf.push(TAG_TIMESTAMP);
                buf.extend_from_slice(&v.to_be_bytes());
            }
        }
    }

    /// Order two non-null values of the same type. Mismatched types and nulls
    /// compare as equal; callers deal with null placement themselves.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Int32(a), Value::Int32(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Float64(a), Value::Float64(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }

    /// Convert a JSON value into a typed value, using the column type as a hint.
    ///
    /// Values that don't fit the hinted type are still converted to their natural
    /// type so that row validation can report them.
    pub fn from_json(value: &serde_json::Value, hint: Option<ColumnType>) -> Self {
        use serde_json::Value as Json;

        match (value, hint) {
            (Json::Null, _) => Value::Null,
            (Json::Bool(b), _) => Value::Bool(*b),
            (Json::Number(n), Some(ColumnType::Int32)) => match n.as_i64() {
                Some(v) => i32::try_from(v)
                    .map(Value::Int32)
                    .unwrap_or(Value::Int64(v)),
                None => Value::Float64(n.as_f64().unwrap_or(f64::NAN)),
            },
            (Json::Number(n), Some(ColumnType::Timestamp)) => match n.as_i64() {
                Some(v) => Value::Timestamp(v),
                None => Value::Float64(n.as_f64().unwrap_or(f64::NAN)),
            },
            (Json::Number(n), Some(ColumnType::Float64)) => {
                Value::Float64(n.as_f64().unwrap_or(f64::NAN))
            }
            (Json::Number(n), _) => match n.as_i64() {
                Some(v) => Value::Int64(v),
                None => Value::Float64(n.as_f64().unwrap_or(f64::NAN)),
            },
            (Json::String(s), Some(ColumnType::Timestamp)) => {
                match DateTime::parse_from_rfc3339(s) {
                    Ok(ts) => Value::Timestamp(ts.timestamp_micros()),
                    Err(_) => Value::String(s.clone()),
                }
            }
            (Json::String(s), _) => Value::String(s.clone()),
            (other, _) => Value::String(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v:?}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Timestamp(v) => match DateTime::from_timestamp_micros(*v) {
                Some(ts) => write!(f, "{}", ts.to_rfc3339()),
                None => write!(f, "{v}"),
            },
        }
    }
}

/// An ordered tuple of values, positionally matching the columns of its table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row(pub Vec<Value>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&Value> {
        self.0.get(position)
    }

    /// Canonical encoding of the values at `positions`, in order.
    pub fn encode_key(&self, positions: &[usize]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(positions.len() * 9);
        for position in positions {
            self.0
                .get(*position)
                .unwrap_or(&Value::Null)
                .encode_key(&mut buf);
        }
        buf
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// Rows submitted together for one table.
pub type Batch = Vec<Row>;

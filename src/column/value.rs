use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::datastore::NativeValue;

// ============================================================================
// Column Values - typed values as callers provide them
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnValue {
    Null,
    Text(String),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    /// An enumeration constant, stored by ordinal.
    Enum { type_name: String, ordinal: i32 },
    /// An embedded structured value, stored in canonical text form.
    Message {
        type_name: String,
        value: serde_json::Value,
    },
    Timestamp(DateTime<Utc>),
    /// A value with no built-in mapping; needs a registered one.
    Custom {
        type_name: String,
        value: serde_json::Value,
    },
}

/// Semantic type tag used to look up a column mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Null,
    Text,
    Int32,
    Int64,
    Float32,
    Float64,
    Bool,
    Bytes,
    Enum,
    Message,
    Timestamp,
    /// A specific named enum, message or custom type.
    Named(String),
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Named(name) => f.write_str(name),
            other => write!(f, "{other:?}"),
        }
    }
}

impl ColumnValue {
    /// The generic type tag of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            ColumnValue::Null => ValueType::Null,
            ColumnValue::Text(_) => ValueType::Text,
            ColumnValue::Int32(_) => ValueType::Int32,
            ColumnValue::Int64(_) => ValueType::Int64,
            ColumnValue::Float32(_) => ValueType::Float32,
            ColumnValue::Float64(_) => ValueType::Float64,
            ColumnValue::Bool(_) => ValueType::Bool,
            ColumnValue::Bytes(_) => ValueType::Bytes,
            ColumnValue::Enum { .. } => ValueType::Enum,
            ColumnValue::Message { .. } => ValueType::Message,
            ColumnValue::Timestamp(_) => ValueType::Timestamp,
            ColumnValue::Custom { type_name, .. } => ValueType::Named(type_name.clone()),
        }
    }

    /// The specific named type, for values that carry one.
    pub fn named_type(&self) -> Option<ValueType> {
        match self {
            ColumnValue::Enum { type_name, .. }
            | ColumnValue::Message { type_name, .. }
            | ColumnValue::Custom { type_name, .. } => Some(ValueType::Named(type_name.clone())),
            _ => None,
        }
    }

    /// Rebuilds a column value from its stored form. Enum ordinals and
    /// message text come back as plain integers and text.
    pub fn from_native(value: &NativeValue) -> Self {
        match value {
            NativeValue::Null => ColumnValue::Null,
            NativeValue::Boolean(b) => ColumnValue::Bool(*b),
            NativeValue::Integer(i) => ColumnValue::Int64(*i),
            NativeValue::Double(d) => ColumnValue::Float64(*d),
            NativeValue::String(s) => ColumnValue::Text(s.clone()),
            NativeValue::Blob(b) => ColumnValue::Bytes(b.clone()),
            NativeValue::Timestamp(t) => ColumnValue::Timestamp(*t),
        }
    }
}

impl From<&str> for ColumnValue {
    fn from(value: &str) -> Self {
        ColumnValue::Text(value.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(value: String) -> Self {
        ColumnValue::Text(value)
    }
}

impl From<i32> for ColumnValue {
    fn from(value: i32) -> Self {
        ColumnValue::Int32(value)
    }
}

impl From<i64> for ColumnValue {
    fn from(value: i64) -> Self {
        ColumnValue::Int64(value)
    }
}

impl From<f32> for ColumnValue {
    fn from(value: f32) -> Self {
        ColumnValue::Float32(value)
    }
}

impl From<f64> for ColumnValue {
    fn from(value: f64) -> Self {
        ColumnValue::Float64(value)
    }
}

impl From<bool> for ColumnValue {
    fn from(value: bool) -> Self {
        ColumnValue::Bool(value)
    }
}

impl From<Vec<u8>> for ColumnValue {
    fn from(value: Vec<u8>) -> Self {
        ColumnValue::Bytes(value)
    }
}

impl From<DateTime<Utc>> for ColumnValue {
    fn from(value: DateTime<Utc>) -> Self {
        ColumnValue::Timestamp(value)
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// ============================================================================
// Native Values - what the document store actually persists
// ============================================================================
//
// Values of different types never match each other in a filter. For
// ordering, types are ranked the way the store sorts mixed properties:
//
//   null < integer/timestamp < boolean < blob < string < double
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NativeValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Blob(Vec<u8>),
    Timestamp(DateTime<Utc>),
}

impl NativeValue {
    fn rank(&self) -> u8 {
        match self {
            NativeValue::Null => 0,
            NativeValue::Integer(_) | NativeValue::Timestamp(_) => 1,
            NativeValue::Boolean(_) => 2,
            NativeValue::Blob(_) => 3,
            NativeValue::String(_) => 4,
            NativeValue::Double(_) => 5,
        }
    }

    /// Comparison used by filters: `None` when the values are of different types.
    pub fn compare(&self, other: &NativeValue) -> Option<Ordering> {
        match (self, other) {
            (NativeValue::Null, NativeValue::Null) => Some(Ordering::Equal),
            (NativeValue::Boolean(a), NativeValue::Boolean(b)) => Some(a.cmp(b)),
            (NativeValue::Integer(a), NativeValue::Integer(b)) => Some(a.cmp(b)),
            (NativeValue::Double(a), NativeValue::Double(b)) => Some(a.total_cmp(b)),
            (NativeValue::String(a), NativeValue::String(b)) => Some(a.cmp(b)),
            (NativeValue::Blob(a), NativeValue::Blob(b)) => Some(a.cmp(b)),
            (NativeValue::Timestamp(a), NativeValue::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order used for sorting query results.
    pub fn total_cmp(&self, other: &NativeValue) -> Ordering {
        match self.compare(other) {
            Some(ordering) => ordering,
            None => match (self, other) {
                (NativeValue::Integer(a), NativeValue::Timestamp(b)) => {
                    a.cmp(&b.timestamp_micros())
                }
                (NativeValue::Timestamp(a), NativeValue::Integer(b)) => {
                    a.timestamp_micros().cmp(b)
                }
                _ => self.rank().cmp(&other.rank()),
            },
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            NativeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            NativeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            NativeValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            NativeValue::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            NativeValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }
}

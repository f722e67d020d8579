use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::value::{ColumnValue, ValueType};
use crate::datastore::NativeValue;
use crate::error::{Result, StorageError};

// ============================================================================
// Column Mapping - typed column value -> native store value
// ============================================================================
//
// An explicit registry from type tag to conversion strategy, filled with the
// built-in mappings at construction. Registered entries override built-ins.
// A value carrying a type name (enum, message, custom) is first looked up by
// that name, then by its generic tag.
//
// ============================================================================

pub trait TypeMapping: Send + Sync {
    fn apply(&self, value: &ColumnValue) -> Result<NativeValue>;
}

impl<F> TypeMapping for F
where
    F: Fn(&ColumnValue) -> Result<NativeValue> + Send + Sync,
{
    fn apply(&self, value: &ColumnValue) -> Result<NativeValue> {
        self(value)
    }
}

#[derive(Clone)]
pub struct ColumnMapping {
    mappings: HashMap<ValueType, Arc<dyn TypeMapping>>,
}

impl ColumnMapping {
    /// A registry holding the built-in mappings.
    pub fn new() -> Self {
        let mut mapping = Self {
            mappings: HashMap::new(),
        };
        mapping.register(ValueType::Null, |_: &ColumnValue| Ok(NativeValue::Null));
        mapping.register(ValueType::Text, |v: &ColumnValue| match v {
            ColumnValue::Text(s) => Ok(NativeValue::String(s.clone())),
            other => Err(mismatch(ValueType::Text, other)),
        });
        mapping.register(ValueType::Int32, |v: &ColumnValue| match v {
            ColumnValue::Int32(i) => Ok(NativeValue::Integer(i64::from(*i))),
            other => Err(mismatch(ValueType::Int32, other)),
        });
        mapping.register(ValueType::Int64, |v: &ColumnValue| match v {
            ColumnValue::Int64(i) => Ok(NativeValue::Integer(*i)),
            other => Err(mismatch(ValueType::Int64, other)),
        });
        mapping.register(ValueType::Float32, |v: &ColumnValue| match v {
            ColumnValue::Float32(f) => Ok(NativeValue::Double(f64::from(*f))),
            other => Err(mismatch(ValueType::Float32, other)),
        });
        mapping.register(ValueType::Float64, |v: &ColumnValue| match v {
            ColumnValue::Float64(f) => Ok(NativeValue::Double(*f)),
            other => Err(mismatch(ValueType::Float64, other)),
        });
        mapping.register(ValueType::Bool, |v: &ColumnValue| match v {
            ColumnValue::Bool(b) => Ok(NativeValue::Boolean(*b)),
            other => Err(mismatch(ValueType::Bool, other)),
        });
        mapping.register(ValueType::Bytes, |v: &ColumnValue| match v {
            ColumnValue::Bytes(b) => Ok(NativeValue::Blob(b.clone())),
            other => Err(mismatch(ValueType::Bytes, other)),
        });
        mapping.register(ValueType::Enum, |v: &ColumnValue| match v {
            ColumnValue::Enum { ordinal, .. } => Ok(NativeValue::Integer(i64::from(*ordinal))),
            other => Err(mismatch(ValueType::Enum, other)),
        });
        mapping.register(ValueType::Message, |v: &ColumnValue| match v {
            ColumnValue::Message { value, .. } => Ok(NativeValue::String(serde_json::to_string(value)?)),
            other => Err(mismatch(ValueType::Message, other)),
        });
        mapping.register(ValueType::Timestamp, |v: &ColumnValue| match v {
            ColumnValue::Timestamp(t) => Ok(NativeValue::Timestamp(*t)),
            other => Err(mismatch(ValueType::Timestamp, other)),
        });
        mapping
    }

    /// Adds or replaces the mapping for `value_type`.
    pub fn register<F>(&mut self, value_type: ValueType, mapping: F)
    where
        F: Fn(&ColumnValue) -> Result<NativeValue> + Send + Sync + 'static,
    {
        self.register_mapping(value_type, Arc::new(mapping));
    }

    pub fn register_mapping(&mut self, value_type: ValueType, mapping: Arc<dyn TypeMapping>) {
        self.mappings.insert(value_type, mapping);
    }

    /// Builder form of [`ColumnMapping::register`].
    pub fn with<F>(mut self, value_type: ValueType, mapping: F) -> Self
    where
        F: Fn(&ColumnValue) -> Result<NativeValue> + Send + Sync + 'static,
    {
        self.register(value_type, mapping);
        self
    }

    pub fn of(&self, value_type: &ValueType) -> Result<Arc<dyn TypeMapping>> {
        self.mappings
            .get(value_type)
            .cloned()
            .ok_or_else(|| StorageError::UnmappedColumnType(value_type.clone()))
    }

    /// Converts `value` with the most specific registered mapping.
    pub fn apply(&self, value: &ColumnValue) -> Result<NativeValue> {
        if let Some(named) = value.named_type() {
            if let Some(mapping) = self.mappings.get(&named) {
                return mapping.apply(value);
            }
        }
        self.of(&value.value_type())?.apply(value)
    }
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ColumnMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnMapping")
            .field("types", &self.mappings.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn mismatch(expected: ValueType, actual: &ColumnValue) -> StorageError {
    StorageError::Configuration(format!(
        "mapping for {expected} received a {} value",
        actual.value_type()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn test_builtin_mappings() {
        let mapping = ColumnMapping::new();
        assert_eq!(mapping.apply(&"abc".into()).unwrap(), NativeValue::String("abc".into()));
        assert_eq!(mapping.apply(&7i32.into()).unwrap(), NativeValue::Integer(7));
        assert_eq!(mapping.apply(&7i64.into()).unwrap(), NativeValue::Integer(7));
        assert_eq!(mapping.apply(&1.5f32.into()).unwrap(), NativeValue::Double(1.5));
        assert_eq!(mapping.apply(&true.into()).unwrap(), NativeValue::Boolean(true));
        assert_eq!(mapping.apply(&vec![1u8, 2].into()).unwrap(), NativeValue::Blob(vec![1, 2]));
        assert_eq!(mapping.apply(&ColumnValue::Null).unwrap(), NativeValue::Null);

        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(mapping.apply(&at.into()).unwrap(), NativeValue::Timestamp(at));
    }

    #[test]
    fn test_enum_maps_to_ordinal() {
        let mapping = ColumnMapping::new();
        let value = ColumnValue::Enum {
            type_name: "TaskStatus".into(),
            ordinal: 3,
        };
        assert_eq!(mapping.apply(&value).unwrap(), NativeValue::Integer(3));
    }

    #[test]
    fn test_message_maps_to_canonical_text() {
        let mapping = ColumnMapping::new();
        let value = ColumnValue::Message {
            type_name: "Address".into(),
            value: json!({"zip": "10001", "city": "NYC"}),
        };
        assert_eq!(
            mapping.apply(&value).unwrap(),
            NativeValue::String(r#"{"city":"NYC","zip":"10001"}"#.into())
        );
    }

    #[test]
    fn test_custom_type_fails_until_registered() {
        let value = ColumnValue::Custom {
            type_name: "Money".into(),
            value: json!({"units": 12, "currency": "EUR"}),
        };

        let mapping = ColumnMapping::new();
        assert!(matches!(
            mapping.apply(&value),
            Err(StorageError::UnmappedColumnType(ValueType::Named(name))) if name == "Money"
        ));

        let mapping = mapping.with(ValueType::Named("Money".into()), |v: &ColumnValue| match v {
            ColumnValue::Custom { value, .. } => Ok(NativeValue::Integer(
                value["units"].as_i64().unwrap_or_default(),
            )),
            _ => Ok(NativeValue::Null),
        });
        assert_eq!(mapping.apply(&value).unwrap(), NativeValue::Integer(12));
    }

    #[test]
    fn test_registered_mapping_overrides_builtin() {
        let mapping = ColumnMapping::new().with(ValueType::Text, |v: &ColumnValue| match v {
            ColumnValue::Text(s) => Ok(NativeValue::String(s.to_lowercase())),
            _ => Ok(NativeValue::Null),
        });
        assert_eq!(mapping.apply(&"ABC".into()).unwrap(), NativeValue::String("abc".into()));
    }

    #[test]
    fn test_named_enum_mapping_takes_precedence() {
        let mapping = ColumnMapping::new().with(ValueType::Named("Priority".into()), |v: &ColumnValue| match v {
            ColumnValue::Enum { ordinal, .. } => Ok(NativeValue::String(format!("P{ordinal}"))),
            _ => Ok(NativeValue::Null),
        });
        let value = ColumnValue::Enum {
            type_name: "Priority".into(),
            ordinal: 1,
        };
        assert_eq!(mapping.apply(&value).unwrap(), NativeValue::String("P1".into()));
    }

    #[test]
    fn test_of_unknown_type() {
        let mapping = ColumnMapping::new();
        assert!(mapping.of(&ValueType::Named("Nope".into())).is_err());
        assert!(mapping.of(&ValueType::Int64).is_ok());
    }
}

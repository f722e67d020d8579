use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

use super::key::{KeyFactory, RecordId};
use crate::column::{ColumnMapping, ColumnValue};
use crate::datastore::{Entity, NativeValue, OrderBy};
use crate::error::{Result, StorageError};
use crate::query::QueryPredicate;

// ============================================================================
// Records - the unit of storage of a RecordStore
// ============================================================================
//
// The payload is the source of truth. Columns are a projection of it, stored
// as separate properties so they can be filtered and ordered on.
//
// Stored form:
//
//   key name  = id.to_key_name()
//   "payload" = Blob(payload)
//   <column>  = ColumnMapping::apply(value)
//
// ============================================================================

/// Property name holding the payload. No column may use it.
pub const PAYLOAD_PROPERTY: &str = "payload";

#[derive(Debug, Clone, PartialEq)]
pub struct Record<I> {
    pub id: I,
    pub payload: Vec<u8>,
    pub columns: BTreeMap<String, ColumnValue>,
}

/// A payload type that knows its own identifier.
pub trait Identified {
    type Id: RecordId;

    fn id(&self) -> Self::Id;
}

impl<I: RecordId> Record<I> {
    pub fn new(id: I, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            payload: payload.into(),
            columns: BTreeMap::new(),
        }
    }

    /// Record of `value`, identified by the value itself, with a JSON payload.
    pub fn of<T>(value: &T) -> Result<Self>
    where
        T: Identified<Id = I> + Serialize,
    {
        Ok(Self::new(value.id(), serde_json::to_vec(value)?))
    }

    pub fn with_column(mut self, name: impl Into<String>, value: impl Into<ColumnValue>) -> Self {
        self.columns.insert(name.into(), value.into());
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnValue> {
        self.columns.get(name)
    }

    /// Decodes a JSON payload.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    pub(crate) fn to_entity(&self, keys: &KeyFactory, mapping: &ColumnMapping) -> Result<Entity> {
        let mut entity = Entity::new(keys.key(&self.id))
            .with(PAYLOAD_PROPERTY, NativeValue::Blob(self.payload.clone()));
        for (name, value) in &self.columns {
            if name == PAYLOAD_PROPERTY {
                return Err(StorageError::Configuration(format!(
                    "column name {PAYLOAD_PROPERTY:?} is reserved (record {:?})",
                    self.id
                )));
            }
            entity.set(name.clone(), mapping.apply(value)?);
        }
        Ok(entity)
    }

    pub(crate) fn from_entity(entity: Entity) -> Result<Self> {
        let id = I::from_key_name(&entity.key.name)?;
        let mut payload = Vec::new();
        let mut columns = BTreeMap::new();
        for (name, value) in entity.properties {
            if name == PAYLOAD_PROPERTY {
                match value {
                    NativeValue::Blob(bytes) => payload = bytes,
                    other => {
                        return Err(StorageError::backend(
                            "decode",
                            format!(
                                "{} has a malformed {PAYLOAD_PROPERTY:?} property: {other:?}",
                                entity.key
                            ),
                        ));
                    }
                }
            } else {
                columns.insert(name, ColumnValue::from_native(&value));
            }
        }
        Ok(Self { id, payload, columns })
    }
}

/// What `RecordStore::read_all_records` returns.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordQuery<I> {
    pub predicate: QueryPredicate,
    /// Restricts the result to these ids.
    pub ids: Option<Vec<I>>,
    /// Ordering over column names.
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
}

impl<I> RecordQuery<I> {
    /// Every record of the kind.
    pub fn all() -> Self {
        Self::matching(QueryPredicate::empty())
    }

    pub fn matching(predicate: QueryPredicate) -> Self {
        Self {
            predicate,
            ids: None,
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn with_ids(mut self, ids: Vec<I>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl<I> Default for RecordQuery<I> {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::Kind;
    use crate::namespace::Namespace;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Task {
        id: String,
        title: String,
    }

    impl Identified for Task {
        type Id = String;

        fn id(&self) -> String {
            self.id.clone()
        }
    }

    fn keys() -> KeyFactory {
        KeyFactory::new(Namespace::default(), Kind::new("Task"))
    }

    #[test]
    fn test_record_of_identified_value() {
        let task = Task {
            id: "a1".to_string(),
            title: "write tests".to_string(),
        };
        let record = Record::of(&task).unwrap();

        assert_eq!(record.id, "a1");
        assert_eq!(record.payload_as::<Task>().unwrap(), task);
    }

    #[test]
    fn test_entity_round_trip() {
        let record = Record::new("a1".to_string(), b"P".to_vec())
            .with_column("title", "write tests")
            .with_column("done", false);

        let entity = record.to_entity(&keys(), &ColumnMapping::new()).unwrap();
        assert_eq!(entity.get(PAYLOAD_PROPERTY), Some(&NativeValue::Blob(b"P".to_vec())));
        assert_eq!(entity.get("done"), Some(&NativeValue::Boolean(false)));

        let restored = Record::<String>::from_entity(entity).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn test_payload_column_is_reserved() {
        let record = Record::new("a1".to_string(), Vec::new()).with_column(PAYLOAD_PROPERTY, "x");
        let result = record.to_entity(&keys(), &ColumnMapping::new());
        assert!(matches!(result, Err(StorageError::Configuration(_))));
    }

    #[test]
    fn test_non_blob_payload_fails_to_decode() {
        let entity = Entity::new(keys().named("a1"))
            .with(PAYLOAD_PROPERTY, NativeValue::String("not bytes".into()));

        match Record::<String>::from_entity(entity) {
            Err(StorageError::Backend { context, message }) => {
                assert_eq!(context, "decode");
                assert!(message.contains("payload"));
            }
            other => panic!("expected decode failure, got {other:?}"),
        }
    }
}

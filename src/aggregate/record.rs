use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datastore::{Entity, NativeValue};
use crate::error::{Result, StorageError};
use crate::storage::KeyFactory;

// ============================================================================
// Aggregate Event Records - events and snapshots of one aggregate
// ============================================================================
//
// Events and snapshots share one kind. Every stored record carries:
//
//   aggregate_id  owning aggregate (key name of its id)
//   created       when the record was written
//   version       aggregate version the record belongs to
//   snapshot      true for snapshots
//   timestamp     when the event happened / the snapshot was taken
//   payload       opaque bytes
//   event_id      events only
//
// Events are keyed by their own id. Snapshots are keyed by the SNAPSHOT marker
// and the aggregate id, qualified by the snapshot version:
// "SNAPSHOT-<aggregate>-<version>". Older snapshots stay addressable for
// `truncate_older_than`, so the latest snapshot slot is not a fixed key: it is
// the first snapshot in history order (version desc, created desc).
//
// ============================================================================

pub const AGGREGATE_ID_PROPERTY: &str = "aggregate_id";
pub const CREATED_PROPERTY: &str = "created";
pub const VERSION_PROPERTY: &str = "version";
pub const SNAPSHOT_PROPERTY: &str = "snapshot";
pub const TIMESTAMP_PROPERTY: &str = "timestamp";
pub const PAYLOAD_PROPERTY: &str = "payload";
pub const EVENT_ID_PROPERTY: &str = "event_id";

pub const SNAPSHOT_MARKER: &str = "SNAPSHOT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub version: i64,
    pub timestamp: DateTime<Utc>,
    pub payload: Vec<u8>,
}

impl Event {
    pub fn new(version: i64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            version,
            timestamp: Utc::now(),
            payload: payload.into(),
        }
    }

    /// Event with a JSON payload.
    pub fn of<E: Serialize>(version: i64, event: &E) -> Result<Self> {
        Ok(Self::new(version, serde_json::to_vec(event)?))
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn payload_as<E: DeserializeOwned>(&self) -> Result<E> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: i64,
    pub timestamp: DateTime<Utc>,
    pub payload: Vec<u8>,
}

impl Snapshot {
    pub fn new(version: i64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            version,
            timestamp: Utc::now(),
            payload: payload.into(),
        }
    }

    /// Snapshot of an aggregate state serialized as JSON.
    pub fn of<S: Serialize>(version: i64, state: &S) -> Result<Self> {
        Ok(Self::new(version, serde_json::to_vec(state)?))
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn payload_as<S: DeserializeOwned>(&self) -> Result<S> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AggregateEventRecord {
    Event(Event),
    Snapshot(Snapshot),
}

impl AggregateEventRecord {
    pub fn version(&self) -> i64 {
        match self {
            AggregateEventRecord::Event(e) => e.version,
            AggregateEventRecord::Snapshot(s) => s.version,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            AggregateEventRecord::Event(e) => e.timestamp,
            AggregateEventRecord::Snapshot(s) => s.timestamp,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            AggregateEventRecord::Event(e) => &e.payload,
            AggregateEventRecord::Snapshot(s) => &s.payload,
        }
    }

    pub fn is_snapshot(&self) -> bool {
        matches!(self, AggregateEventRecord::Snapshot(_))
    }

    /// Key name of this record within the aggregate kind.
    pub fn key_name(&self, aggregate: &str) -> String {
        match self {
            AggregateEventRecord::Event(e) => e.id.to_string(),
            AggregateEventRecord::Snapshot(s) => {
                format!("{SNAPSHOT_MARKER}-{aggregate}-{}", s.version)
            }
        }
    }

    pub(crate) fn to_entity(&self, keys: &KeyFactory, aggregate: &str, created: DateTime<Utc>) -> Entity {
        let mut entity = Entity::new(keys.named(self.key_name(aggregate)))
            .with(AGGREGATE_ID_PROPERTY, NativeValue::String(aggregate.to_string()))
            .with(CREATED_PROPERTY, NativeValue::Timestamp(created))
            .with(VERSION_PROPERTY, NativeValue::Integer(self.version()))
            .with(SNAPSHOT_PROPERTY, NativeValue::Boolean(self.is_snapshot()))
            .with(TIMESTAMP_PROPERTY, NativeValue::Timestamp(self.timestamp()))
            .with(PAYLOAD_PROPERTY, NativeValue::Blob(self.payload().to_vec()));
        if let AggregateEventRecord::Event(event) = self {
            entity.set(EVENT_ID_PROPERTY, NativeValue::String(event.id.to_string()));
        }
        entity
    }

    pub(crate) fn from_entity(entity: &Entity) -> Result<Self> {
        let field = |name: &str| {
            entity.get(name).ok_or_else(|| {
                StorageError::backend("decode", format!("{} has no {name:?} property", entity.key))
            })
        };
        let malformed = |name: &str| {
            StorageError::backend("decode", format!("{} has a malformed {name:?} property", entity.key))
        };

        let version = field(VERSION_PROPERTY)?
            .as_integer()
            .ok_or_else(|| malformed(VERSION_PROPERTY))?;
        let timestamp = field(TIMESTAMP_PROPERTY)?
            .as_timestamp()
            .ok_or_else(|| malformed(TIMESTAMP_PROPERTY))?;
        let payload = field(PAYLOAD_PROPERTY)?
            .as_blob()
            .ok_or_else(|| malformed(PAYLOAD_PROPERTY))?
            .to_vec();
        let is_snapshot = field(SNAPSHOT_PROPERTY)?
            .as_bool()
            .ok_or_else(|| malformed(SNAPSHOT_PROPERTY))?;

        if is_snapshot {
            return Ok(AggregateEventRecord::Snapshot(Snapshot {
                version,
                timestamp,
                payload,
            }));
        }

        let id = field(EVENT_ID_PROPERTY)?
            .as_str()
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| malformed(EVENT_ID_PROPERTY))?;
        Ok(AggregateEventRecord::Event(Event {
            id,
            version,
            timestamp,
            payload,
        }))
    }
}

impl From<Event> for AggregateEventRecord {
    fn from(event: Event) -> Self {
        AggregateEventRecord::Event(event)
    }
}

impl From<Snapshot> for AggregateEventRecord {
    fn from(snapshot: Snapshot) -> Self {
        AggregateEventRecord::Snapshot(snapshot)
    }
}

/// Archived/deleted markers of an aggregate. Absent flags read as both false.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleFlags {
    pub archived: bool,
    pub deleted: bool,
}

impl LifecycleFlags {
    pub fn archived() -> Self {
        Self {
            archived: true,
            deleted: false,
        }
    }

    pub fn deleted() -> Self {
        Self {
            archived: false,
            deleted: true,
        }
    }

    pub fn is_set(&self) -> bool {
        self.archived || self.deleted
    }
}

/// The latest snapshot of an aggregate and the events after it, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateHistory {
    pub snapshot: Option<Snapshot>,
    pub events: Vec<Event>,
}

impl AggregateHistory {
    pub fn is_empty(&self) -> bool {
        self.snapshot.is_none() && self.events.is_empty()
    }

    /// Version reached after the last event, or the snapshot's.
    pub fn version(&self) -> Option<i64> {
        self.events
            .last()
            .map(|e| e.version)
            .or_else(|| self.snapshot.as_ref().map(|s| s.version))
    }
}

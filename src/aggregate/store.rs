use chrono::Utc;
use futures_util::future;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::marker::PhantomData;

use super::record::{
    AggregateEventRecord, AggregateHistory, LifecycleFlags, AGGREGATE_ID_PROPERTY,
    CREATED_PROPERTY, SNAPSHOT_PROPERTY, VERSION_PROPERTY,
};
use crate::datastore::{ConjunctiveFilter, Entity, EntityQuery, Kind, NativeValue, OrderBy, PropertyFilter};
use crate::error::{Result, StorageError};
use crate::namespace::Namespace;
use crate::storage::factory::StorageContext;
use crate::storage::{DatastoreWrapper, RecordId, TransactionScope};

// ============================================================================
// Aggregate Event Store - append-only event/snapshot history per aggregate
// ============================================================================
//
// Per aggregate id:
// - an unordered, append-only set of events and snapshots
// - the number of events written since the last snapshot
// - lifecycle flags (archived, deleted)
//
// The two side values live in sibling kinds (`<kind>.EventCount`,
// `<kind>.LifecycleFlags`) keyed by the aggregate id, and are the only
// mutable state.
//
// History is read backwards: version desc, then created desc, then snapshots
// before events of the same version.
//
// ============================================================================

const EVENT_COUNT_KIND: &str = "EventCount";
const LIFECYCLE_FLAGS_KIND: &str = "LifecycleFlags";
const COUNT_PROPERTY: &str = "count";
const ARCHIVED_PROPERTY: &str = "archived";
const DELETED_PROPERTY: &str = "deleted";

pub struct AggregateEventStore<I> {
    kind: Kind,
    counts_kind: Kind,
    flags_kind: Kind,
    wrapper: DatastoreWrapper,
    context: StorageContext,
    _id: PhantomData<fn() -> I>,
}

impl<I: RecordId> AggregateEventStore<I> {
    pub(crate) fn new(kind: Kind, wrapper: DatastoreWrapper, context: StorageContext) -> Self {
        Self {
            counts_kind: kind.child(EVENT_COUNT_KIND),
            flags_kind: kind.child(LIFECYCLE_FLAGS_KIND),
            kind,
            wrapper,
            context,
            _id: PhantomData,
        }
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    fn label(&self, id: &I) -> String {
        format!("kind={} aggregate_id={}", self.kind, id.to_key_name())
    }

    /// Appends an event or snapshot to the history of `id`.
    pub async fn write_record(&self, id: &I, record: &AggregateEventRecord) -> Result<()> {
        self.write_records(id, std::slice::from_ref(record)).await
    }

    async fn write_records(&self, id: &I, records: &[AggregateEventRecord]) -> Result<()> {
        let namespace = self.context.resolver.current()?;
        let keys = self.context.keys.get(&namespace, &self.kind);
        let aggregate = id.to_key_name();
        let created = Utc::now();

        let entities = records
            .iter()
            .map(|record| record.to_entity(&keys, &aggregate, created))
            .collect();
        self.wrapper.put(entities, &self.label(id)).await?;
        self.context.index.keep(&namespace);

        tracing::debug!(
            kind = %self.kind,
            namespace = %namespace,
            aggregate_id = %aggregate,
            count = records.len(),
            "Aggregate records written"
        );
        Ok(())
    }

    /// The history of `id`, newest first, fetched `batch_size` records per
    /// round-trip as the stream is consumed.
    pub fn history_backward(
        &self,
        id: &I,
        batch_size: usize,
    ) -> BoxStream<'_, Result<AggregateEventRecord>> {
        self.history_entities(id, batch_size)
            .map(|entity| entity.and_then(|entity| AggregateEventRecord::from_entity(&entity)))
            .boxed()
    }

    fn history_entities(&self, id: &I, batch_size: usize) -> BoxStream<'_, Result<Entity>> {
        if batch_size == 0 {
            return failed(StorageError::Configuration(
                "history batch size must be at least 1".to_string(),
            ));
        }
        let namespace = match self.context.resolver.current() {
            Ok(namespace) => namespace,
            Err(e) => return failed(e),
        };

        let filter = ConjunctiveFilter::of(PropertyFilter::equal(
            AGGREGATE_ID_PROPERTY,
            NativeValue::String(id.to_key_name()),
        ));
        let query = EntityQuery::new(namespace, self.kind.clone())
            .with_filter(Some(filter))
            .order_by(OrderBy::desc(VERSION_PROPERTY))
            .order_by(OrderBy::desc(CREATED_PROPERTY))
            .order_by(OrderBy::desc(SNAPSHOT_PROPERTY));

        self.wrapper.query_stream(query, batch_size)
    }

    /// The latest snapshot and the events after it, oldest first. `None` when
    /// nothing was ever written for `id`.
    pub async fn read_history(&self, id: &I, batch_size: usize) -> Result<Option<AggregateHistory>> {
        let mut records = self.history_backward(id, batch_size);
        let mut history = AggregateHistory::default();

        while let Some(record) = records.try_next().await? {
            match record {
                AggregateEventRecord::Snapshot(snapshot) => {
                    history.snapshot = Some(snapshot);
                    break;
                }
                AggregateEventRecord::Event(event) => history.events.push(event),
            }
        }
        history.events.reverse();

        tracing::debug!(
            kind = %self.kind,
            aggregate_id = %id.to_key_name(),
            snapshot = history.snapshot.is_some(),
            events = history.events.len(),
            "Aggregate history read"
        );
        Ok((!history.is_empty()).then_some(history))
    }

    /// Writes the snapshot and events of `history` in one batch.
    pub async fn write_history(&self, id: &I, history: &AggregateHistory) -> Result<()> {
        let mut records: Vec<AggregateEventRecord> = Vec::with_capacity(history.events.len() + 1);
        if let Some(snapshot) = &history.snapshot {
            records.push(snapshot.clone().into());
        }
        records.extend(history.events.iter().cloned().map(AggregateEventRecord::from));
        if records.is_empty() {
            return Ok(());
        }
        self.write_records(id, &records).await
    }

    /// Deletes every record older than the `snapshot_index`-th most recent
    /// snapshot (0 = the latest). Returns the number of deleted records.
    pub async fn truncate_older_than(&self, id: &I, snapshot_index: usize) -> Result<usize> {
        let mut entities = self.history_entities(id, self.context.page_size);
        let mut snapshots_seen = 0;
        let mut past_cutoff = false;
        let mut doomed = Vec::new();

        while let Some(entity) = entities.try_next().await? {
            if past_cutoff {
                doomed.push(entity.key);
                continue;
            }
            if entity.get(SNAPSHOT_PROPERTY).and_then(NativeValue::as_bool) == Some(true) {
                if snapshots_seen == snapshot_index {
                    past_cutoff = true;
                }
                snapshots_seen += 1;
            }
        }
        drop(entities);

        let count = doomed.len();
        if count > 0 {
            self.wrapper.delete(doomed, &self.label(id)).await?;
        }
        tracing::info!(
            kind = %self.kind,
            aggregate_id = %id.to_key_name(),
            snapshot_index,
            count,
            "Aggregate history truncated"
        );
        Ok(count)
    }

    /// Events written since the last snapshot; 0 if never written.
    pub async fn read_event_count_after_last_snapshot(&self, id: &I) -> Result<i32> {
        let Some(entity) = self.read_side_value(&self.counts_kind, id).await? else {
            return Ok(0);
        };
        let count = entity
            .get(COUNT_PROPERTY)
            .and_then(NativeValue::as_integer)
            .unwrap_or_default();
        i32::try_from(count).map_err(|_| {
            StorageError::backend("decode", format!("event count {count} of {} is out of range", entity.key))
        })
    }

    pub async fn write_event_count_after_last_snapshot(&self, id: &I, count: i32) -> Result<()> {
        let namespace = self.context.resolver.current()?;
        let keys = self.context.keys.get(&namespace, &self.counts_kind);
        let entity = Entity::new(keys.key(id)).with(COUNT_PROPERTY, NativeValue::Integer(count.into()));

        self.wrapper.put(vec![entity], &self.label(id)).await?;
        self.context.index.keep(&namespace);
        tracing::debug!(kind = %self.kind, aggregate_id = %id.to_key_name(), count, "Event count written");
        Ok(())
    }

    /// `None` unless at least one flag is set.
    pub async fn read_lifecycle_flags(&self, id: &I) -> Result<Option<LifecycleFlags>> {
        let Some(entity) = self.read_side_value(&self.flags_kind, id).await? else {
            return Ok(None);
        };
        let flag = |name: &str| entity.get(name).and_then(NativeValue::as_bool).unwrap_or(false);
        let flags = LifecycleFlags {
            archived: flag(ARCHIVED_PROPERTY),
            deleted: flag(DELETED_PROPERTY),
        };
        Ok(flags.is_set().then_some(flags))
    }

    pub async fn write_lifecycle_flags(&self, id: &I, flags: LifecycleFlags) -> Result<()> {
        let namespace = self.context.resolver.current()?;
        let keys = self.context.keys.get(&namespace, &self.flags_kind);
        let entity = Entity::new(keys.key(id))
            .with(ARCHIVED_PROPERTY, NativeValue::Boolean(flags.archived))
            .with(DELETED_PROPERTY, NativeValue::Boolean(flags.deleted));

        self.wrapper.put(vec![entity], &self.label(id)).await?;
        self.context.index.keep(&namespace);
        tracing::debug!(
            kind = %self.kind,
            aggregate_id = %id.to_key_name(),
            archived = flags.archived,
            deleted = flags.deleted,
            "Lifecycle flags written"
        );
        Ok(())
    }

    async fn read_side_value(&self, kind: &Kind, id: &I) -> Result<Option<Entity>> {
        let namespace = self.context.resolver.current()?;
        let keys = self.context.keys.get(&namespace, kind);
        let found = self.wrapper.lookup(vec![keys.key(id)], &self.label(id)).await?;
        Ok(found.into_iter().next().flatten())
    }

    /// Every aggregate id with at least one event or snapshot.
    pub fn index(&self) -> BoxStream<'_, Result<I>> {
        let namespace: Namespace = match self.context.resolver.current() {
            Ok(namespace) => namespace,
            Err(e) => return failed(e),
        };
        let query = EntityQuery::new(namespace, self.kind.clone())
            .order_by(OrderBy::asc(AGGREGATE_ID_PROPERTY));

        let mut seen = HashSet::new();
        self.wrapper
            .query_stream(query, self.context.page_size)
            .try_filter_map(move |entity| {
                let fresh = entity
                    .get(AGGREGATE_ID_PROPERTY)
                    .and_then(NativeValue::as_str)
                    .filter(|aggregate| seen.insert(aggregate.to_string()))
                    .map(I::from_key_name);
                future::ready(fresh.transpose())
            })
            .boxed()
    }

    pub async fn begin_transaction(&self) -> Result<TransactionScope<'_>> {
        self.wrapper.begin().await
    }
}

fn failed<'a, T: Send + 'a>(error: StorageError) -> BoxStream<'a, Result<T>> {
    stream::once(future::ready(Err(error))).boxed()
}

use futures_util::future;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use super::factory::StorageContext;
use super::key::{KeyFactory, RecordId};
use super::record::{Record, RecordQuery};
use super::transaction::TransactionScope;
use super::wrapper::DatastoreWrapper;
use crate::datastore::{compare_entities, ConjunctiveFilter, Entity, EntityQuery, Kind, OrderBy};
use crate::error::{Result, StorageError};
use crate::namespace::Namespace;
use crate::query::{PredicateCompiler, QueryPredicate};

// ============================================================================
// Record Store - keyed CRUD and querying over one kind
// ============================================================================
//
// Every operation works in the namespace of the current tenant, resolved when
// the operation is called.
//
// Querying:
// - the predicate is compiled into conjunctive filters; no filter means
//   "every record of the kind"
// - one filter runs as a single lazy native query
// - several filters run one after another and are merged, dropping records
//   that match more than one filter
// - ordering or a limit over several filters needs the merged set, so those
//   results are collected before they are yielded
//
// ============================================================================

pub struct RecordStore<I> {
    kind: Kind,
    wrapper: DatastoreWrapper,
    context: StorageContext,
    compiler: PredicateCompiler,
    _id: PhantomData<fn() -> I>,
}

impl<I: RecordId> RecordStore<I> {
    pub(crate) fn new(kind: Kind, wrapper: DatastoreWrapper, context: StorageContext) -> Self {
        let compiler = PredicateCompiler::new(context.mapping.clone());
        Self {
            kind,
            wrapper,
            context,
            compiler,
            _id: PhantomData,
        }
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    fn key_factory(&self) -> Result<Arc<KeyFactory>> {
        let namespace = self.context.resolver.current()?;
        Ok(self.context.keys.get(&namespace, &self.kind))
    }

    /// Reads one record. A missing id is `None`, never an error.
    pub async fn read(&self, id: &I) -> Result<Option<Record<I>>> {
        let keys = self.key_factory()?;
        let key = keys.key(id);
        let label = format!("kind={} id={}", self.kind, key.name);

        let found = self.wrapper.lookup(vec![key], &label).await?;
        let record = found
            .into_iter()
            .next()
            .flatten()
            .map(Record::<I>::from_entity)
            .transpose()?;

        tracing::debug!(
            kind = %self.kind,
            namespace = %keys.namespace(),
            found = record.is_some(),
            "Record read"
        );
        Ok(record)
    }

    /// Reads several records, one slot per id in input order.
    pub async fn read_all_by_ids(&self, ids: &[I]) -> Result<Vec<Option<Record<I>>>> {
        let keys = self.key_factory()?;
        let label = format!("kind={} ids={}", self.kind, ids.len());
        let found = self
            .wrapper
            .lookup(ids.iter().map(|id| keys.key(id)).collect(), &label)
            .await?;

        found
            .into_iter()
            .map(|entity| entity.map(Record::<I>::from_entity).transpose())
            .collect()
    }

    /// Inserts or overwrites a record.
    pub async fn write(&self, record: &Record<I>) -> Result<()> {
        let keys = self.key_factory()?;
        let entity = record.to_entity(&keys, &self.context.mapping)?;
        let label = format!("kind={} id={}", self.kind, entity.key.name);

        self.wrapper.put(vec![entity], &label).await?;
        self.context.index.keep(keys.namespace());

        tracing::debug!(kind = %self.kind, namespace = %keys.namespace(), id = ?record.id, "Record written");
        Ok(())
    }

    /// Inserts or overwrites many records, split into calls of at most the
    /// write batch limit. Without a transaction, a failure can leave earlier
    /// chunks written.
    pub async fn write_all(&self, records: &[Record<I>]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let keys = self.key_factory()?;
        let entities = records
            .iter()
            .map(|record| record.to_entity(&keys, &self.context.mapping))
            .collect::<Result<Vec<_>>>()?;
        let label = format!("kind={} records={}", self.kind, entities.len());

        self.wrapper.put(entities, &label).await?;
        self.context.index.keep(keys.namespace());

        tracing::info!(
            kind = %self.kind,
            namespace = %keys.namespace(),
            count = records.len(),
            "Records written"
        );
        Ok(())
    }

    /// Deletes a record. Always `true`: the store does not report whether the
    /// record existed.
    pub async fn delete(&self, id: &I) -> Result<bool> {
        let keys = self.key_factory()?;
        let key = keys.key(id);
        let label = format!("kind={} id={}", self.kind, key.name);

        self.wrapper.delete(vec![key], &label).await?;
        tracing::debug!(kind = %self.kind, namespace = %keys.namespace(), id = ?id, "Record deleted");
        Ok(true)
    }

    /// Every id of the kind.
    pub fn index(&self) -> BoxStream<'_, Result<I>> {
        self.index_matching(&QueryPredicate::empty())
    }

    /// Ids of the records matching `predicate`.
    pub fn index_matching(&self, predicate: &QueryPredicate) -> BoxStream<'_, Result<I>> {
        let namespace = match self.context.resolver.current() {
            Ok(namespace) => namespace,
            Err(e) => return failed(e),
        };
        let filters = match self.compiler.compile(predicate) {
            Ok(filters) => filters,
            Err(e) => return failed(e),
        };

        self.entity_stream(namespace, filters, Vec::new(), None, true)
            .map(|entity| entity.and_then(|entity| I::from_key_name(&entity.key.name)))
            .boxed()
    }

    /// Records matching `query`.
    pub fn read_all_records(&self, query: RecordQuery<I>) -> BoxStream<'_, Result<Record<I>>> {
        let namespace = match self.context.resolver.current() {
            Ok(namespace) => namespace,
            Err(e) => return failed(e),
        };
        let filters = match self.compiler.compile(&query.predicate) {
            Ok(filters) => filters,
            Err(e) => return failed(e),
        };
        tracing::debug!(
            kind = %self.kind,
            namespace = %namespace,
            filters = filters.len(),
            "Reading records"
        );

        let entities = match query.ids {
            Some(ids) => self.lookup_matching(namespace, ids, filters, query.order_by, query.limit),
            None => self.entity_stream(namespace, filters, query.order_by, query.limit, false),
        };
        entities
            .map(|entity| entity.and_then(Record::<I>::from_entity))
            .boxed()
    }

    /// Starts an explicit transaction; until it finishes, every operation of
    /// this store runs inside it.
    pub async fn begin_transaction(&self) -> Result<TransactionScope<'_>> {
        self.wrapper.begin().await
    }

    /// Looks `ids` up by key and applies the filters client-side.
    fn lookup_matching(
        &self,
        namespace: Namespace,
        ids: Vec<I>,
        filters: Vec<ConjunctiveFilter>,
        order: Vec<OrderBy>,
        limit: Option<usize>,
    ) -> BoxStream<'_, Result<Entity>> {
        let keys = self.context.keys.get(&namespace, &self.kind);
        let label = format!("kind={} ids={}", self.kind, ids.len());

        stream::once(async move {
            let found = self
                .wrapper
                .lookup(ids.iter().map(|id| keys.key(id)).collect(), &label)
                .await?;
            let mut matched: Vec<Entity> = found
                .into_iter()
                .flatten()
                .filter(|entity| filters.is_empty() || filters.iter().any(|f| f.matches(entity)))
                .collect();
            if !order.is_empty() {
                matched.sort_by(|a, b| compare_entities(&order, a, b));
            }
            if let Some(limit) = limit {
                matched.truncate(limit);
            }
            Ok::<_, StorageError>(stream::iter(matched.into_iter().map(Ok)))
        })
        .try_flatten()
        .boxed()
    }

    fn entity_stream(
        &self,
        namespace: Namespace,
        filters: Vec<ConjunctiveFilter>,
        order: Vec<OrderBy>,
        limit: Option<usize>,
        keys_only: bool,
    ) -> BoxStream<'_, Result<Entity>> {
        let wrapper = &self.wrapper;
        let page_size = self.context.page_size;
        let kind = self.kind.clone();
        let merge_order = order.clone();
        let build = move |filter: Option<ConjunctiveFilter>| {
            let mut query = EntityQuery::new(namespace.clone(), kind.clone())
                .with_filter(filter)
                .with_limit(limit);
            query.order = order.clone();
            if keys_only {
                query = query.keys_only();
            }
            query
        };

        if filters.len() <= 1 {
            let query = build(filters.into_iter().next());
            return wrapper.query_stream(query, page_size);
        }

        if merge_order.is_empty() && limit.is_none() {
            let mut seen = HashSet::new();
            return stream::iter(filters)
                .map(move |filter| wrapper.query_stream(build(Some(filter)), page_size))
                .flatten()
                .try_filter(move |entity| future::ready(seen.insert(entity.key.clone())))
                .boxed();
        }

        stream::once(async move {
            let mut seen = HashSet::new();
            let mut merged = Vec::new();
            for filter in filters {
                let mut results = wrapper.query_stream(build(Some(filter)), page_size);
                while let Some(entity) = results.try_next().await? {
                    if seen.insert(entity.key.clone()) {
                        merged.push(entity);
                    }
                }
            }
            merged.sort_by(|a, b| compare_entities(&merge_order, a, b));
            if let Some(limit) = limit {
                merged.truncate(limit);
            }
            Ok::<_, StorageError>(stream::iter(merged.into_iter().map(Ok)))
        })
        .try_flatten()
        .boxed()
    }
}

fn failed<'a, T: Send + 'a>(error: StorageError) -> BoxStream<'a, Result<T>> {
    stream::once(future::ready(Err(error))).boxed()
}

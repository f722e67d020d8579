use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::transaction::{TransactionCoordinator, TransactionScope};
use crate::datastore::{
    BatchLimits, Datastore, DatastoreTransaction, Entity, EntityQuery, Key, QueryResults,
};
use crate::error::{OperationKind, Result, StorageError};
use crate::metrics::StorageMetrics;

// ============================================================================
// Datastore Wrapper - every round-trip of a storage goes through here
// ============================================================================
//
// Per call:
// 1. Fail with `Closed` once the owning factory is closed
// 2. Route to the active transaction of this handle, if there is one
// 3. Otherwise, with the transactional policy on, wrap the call in its own
//    transaction: commit on success, roll back on failure, and report the
//    cause as a Read/Write operation fault
// 4. Otherwise call the store directly
//
// Bulk calls are split to the per-call ceilings, keeping input order.
//
// ============================================================================

#[derive(Clone)]
enum Target {
    Direct(Arc<dyn Datastore>),
    Transaction(Arc<dyn DatastoreTransaction>),
}

/// Where the calls of one operation go, with chunking to the batch limits.
#[derive(Clone)]
pub struct Route {
    target: Target,
    limits: BatchLimits,
    metrics: Option<Arc<StorageMetrics>>,
}

impl Route {
    pub fn is_transactional(&self) -> bool {
        matches!(self.target, Target::Transaction(_))
    }

    pub async fn lookup(&self, keys: &[Key]) -> Result<Vec<Option<Entity>>> {
        let mut found = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(self.limits.read.max(1)) {
            let result = match &self.target {
                Target::Direct(store) => store.lookup(chunk).await,
                Target::Transaction(tx) => tx.lookup(chunk).await,
            };
            found.extend(self.observe("lookup", result)?);
        }
        Ok(found)
    }

    pub async fn put(&self, entities: Vec<Entity>) -> Result<()> {
        let total = entities.len();
        let limit = self.limits.write.max(1);
        let mut remaining = entities.into_iter().peekable();
        while remaining.peek().is_some() {
            let chunk: Vec<Entity> = remaining.by_ref().take(limit).collect();
            let written = chunk.len();
            let result = match &self.target {
                Target::Direct(store) => store.put(chunk).await,
                Target::Transaction(tx) => tx.put(chunk).await,
            };
            self.observe("put", result)?;
            if let Some(metrics) = &self.metrics {
                metrics.record_entities_written(written);
            }
        }
        tracing::trace!(count = total, "Entities put");
        Ok(())
    }

    pub async fn delete(&self, keys: &[Key]) -> Result<()> {
        for chunk in keys.chunks(self.limits.write.max(1)) {
            let result = match &self.target {
                Target::Direct(store) => store.delete(chunk).await,
                Target::Transaction(tx) => tx.delete(chunk).await,
            };
            self.observe("delete", result)?;
        }
        Ok(())
    }

    pub async fn run_query(&self, query: &EntityQuery) -> Result<QueryResults> {
        let result = match &self.target {
            Target::Direct(store) => store.run_query(query).await,
            Target::Transaction(tx) => tx.run_query(query).await,
        };
        self.observe("query", result)
    }

    fn observe<T>(&self, operation: &str, result: Result<T>) -> Result<T> {
        if let Some(metrics) = &self.metrics {
            metrics.record_round_trip(operation, result.is_ok());
        }
        result
    }
}

pub struct DatastoreWrapper {
    datastore: Arc<dyn Datastore>,
    coordinator: Arc<TransactionCoordinator>,
    limits: BatchLimits,
    transactional: bool,
    closed: Arc<AtomicBool>,
    metrics: Option<Arc<StorageMetrics>>,
}

impl DatastoreWrapper {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        limits: BatchLimits,
        transactional: bool,
        closed: Arc<AtomicBool>,
        metrics: Option<Arc<StorageMetrics>>,
    ) -> Self {
        let coordinator = Arc::new(TransactionCoordinator::new(datastore.clone(), metrics.clone()));
        Self {
            datastore,
            coordinator,
            limits,
            transactional,
            closed,
            metrics,
        }
    }

    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    /// Starts an explicit transaction on this handle.
    pub async fn begin(&self) -> Result<TransactionScope<'_>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        self.coordinator.begin().await
    }

    pub fn limits(&self) -> BatchLimits {
        self.limits
    }

    fn route(&self, target: Target) -> Route {
        Route {
            target,
            limits: self.limits,
            metrics: self.metrics.clone(),
        }
    }

    /// Runs one storage operation under the transaction policy of this handle.
    pub async fn execute<'a, T, F>(&self, kind: OperationKind, label: &str, operation: F) -> Result<T>
    where
        F: FnOnce(Route) -> BoxFuture<'a, Result<T>> + Send,
        T: Send,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }

        if let Some(transaction) = self.coordinator.active() {
            return operation(self.route(Target::Transaction(transaction)))
                .await
                .map_err(|e| {
                    tracing::warn!(operation = %kind, target = label, error = %e, "Operation failed inside transaction");
                    e.in_operation(kind)
                });
        }

        if !self.transactional {
            return operation(self.route(Target::Direct(self.datastore.clone())))
                .await
                .map_err(|e| e.with_context(label));
        }

        let transaction: Arc<dyn DatastoreTransaction> =
            Arc::from(self.datastore.begin_transaction().await.map_err(|e| e.in_operation(kind))?);

        let result = match operation(self.route(Target::Transaction(transaction.clone()))).await {
            Ok(value) => transaction.commit().await.map(|()| value),
            Err(e) => Err(e),
        };

        match result {
            Ok(value) => {
                self.record_transaction(true);
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(operation = %kind, target = label, error = %e, "Rolling back implicit transaction");
                if let Err(rollback_error) = transaction.rollback().await {
                    tracing::debug!(error = %rollback_error, "Implicit transaction already released");
                }
                self.record_transaction(false);
                Err(e.with_context(label).in_operation(kind))
            }
        }
    }

    fn record_transaction(&self, committed: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_transaction(committed);
        }
    }

    pub async fn lookup(&self, keys: Vec<Key>, label: &str) -> Result<Vec<Option<Entity>>> {
        self.execute(OperationKind::Read, label, move |route| {
            Box::pin(async move { route.lookup(&keys).await })
        })
        .await
    }

    pub async fn put(&self, entities: Vec<Entity>, label: &str) -> Result<()> {
        self.execute(OperationKind::Write, label, move |route| {
            Box::pin(async move { route.put(entities).await })
        })
        .await
    }

    pub async fn delete(&self, keys: Vec<Key>, label: &str) -> Result<()> {
        self.execute(OperationKind::Write, label, move |route| {
            Box::pin(async move { route.delete(&keys).await })
        })
        .await
    }

    pub async fn run_query(&self, query: EntityQuery) -> Result<QueryResults> {
        let label = query.to_string();
        self.execute(OperationKind::Read, &label, move |route| {
            Box::pin(async move { route.run_query(&query).await })
        })
        .await
    }

    /// Lazily walks every result of `query`, one page of at most `page_size`
    /// per round-trip. Each page starts from the cursor of the previous one.
    pub fn query_stream(&self, query: EntityQuery, page_size: usize) -> BoxStream<'_, Result<Entity>> {
        let page_size = page_size.max(1);
        let state = PageState {
            remaining: query.limit,
            query,
            done: false,
        };

        stream::try_unfold(state, move |mut state| async move {
            if state.done {
                return Ok(None);
            }
            let limit = state.remaining.map_or(page_size, |r| r.min(page_size));
            if limit == 0 {
                return Ok(None);
            }

            let mut page_query = state.query.clone();
            page_query.limit = Some(limit);
            let results = self.run_query(page_query).await?;

            let fetched = results.entities.len();
            if let Some(remaining) = state.remaining.as_mut() {
                *remaining = remaining.saturating_sub(fetched);
            }
            state.done = !results.more_results || fetched == 0 || results.end_cursor.is_none();
            state.query.start_cursor = results.end_cursor;
            tracing::trace!(kind = %state.query.kind, fetched, "Query page fetched");

            Ok::<_, StorageError>(Some((results.entities, state)))
        })
        .map_ok(|page| stream::iter(page.into_iter().map(Ok)))
        .try_flatten()
        .boxed()
    }
}

struct PageState {
    query: EntityQuery,
    remaining: Option<usize>,
    done: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::memory::FailurePoint;
    use crate::datastore::{Kind, MemoryDatastore, NativeValue, OrderBy};
    use crate::namespace::Namespace;

    fn key(name: &str) -> Key {
        Key::new(Namespace::default(), Kind::new("Task"), name)
    }

    fn task(n: i64) -> Entity {
        Entity::new(key(&format!("t{n:04}"))).with("n", NativeValue::Integer(n))
    }

    fn wrapper(store: &MemoryDatastore, transactional: bool) -> DatastoreWrapper {
        DatastoreWrapper::new(
            Arc::new(store.clone()),
            BatchLimits { read: 10, write: 5 },
            transactional,
            Arc::new(AtomicBool::new(false)),
            None,
        )
    }

    fn limited_store() -> MemoryDatastore {
        MemoryDatastore::with_limits(BatchLimits { read: 10, write: 5 }, 7)
    }

    #[tokio::test]
    async fn test_bulk_calls_are_chunked() {
        let store = limited_store();
        let wrapper = wrapper(&store, false);

        wrapper.put((0..23).map(task).collect(), "bulk").await.unwrap();
        assert_eq!(store.entity_count(), 23);
        assert_eq!(store.stats().puts, 5);

        let keys: Vec<Key> = (0..23).rev().map(|n| key(&format!("t{n:04}"))).collect();
        let found = wrapper.lookup(keys, "bulk").await.unwrap();
        assert_eq!(store.stats().lookups, 3);
        assert_eq!(found.len(), 23);
        assert_eq!(found[0].as_ref().unwrap().key.name, "t0022");
        assert_eq!(found[22].as_ref().unwrap().key.name, "t0000");
    }

    #[tokio::test]
    async fn test_query_stream_follows_cursors() {
        let store = limited_store();
        let wrapper = wrapper(&store, false);
        wrapper.put((0..20).map(task).collect(), "seed").await.unwrap();

        let query = EntityQuery::new(Namespace::default(), Kind::new("Task")).order_by(OrderBy::desc("n"));
        let all: Vec<Entity> = wrapper.query_stream(query, 3).try_collect().await.unwrap();

        assert_eq!(all.len(), 20);
        assert_eq!(all[0].get("n"), Some(&NativeValue::Integer(19)));
        assert_eq!(all[19].get("n"), Some(&NativeValue::Integer(0)));
        assert_eq!(store.stats().queries, 7);
    }

    #[tokio::test]
    async fn test_query_stream_honours_limit() {
        let store = limited_store();
        let wrapper = wrapper(&store, false);
        wrapper.put((0..20).map(task).collect(), "seed").await.unwrap();

        let query = EntityQuery::new(Namespace::default(), Kind::new("Task")).with_limit(Some(8));
        let all: Vec<Entity> = wrapper.query_stream(query, 3).try_collect().await.unwrap();
        assert_eq!(all.len(), 8);
    }

    #[tokio::test]
    async fn test_implicit_transaction_rolls_back_and_names_operation() {
        let store = limited_store();
        let wrapper = wrapper(&store, true);
        store.fail_next(FailurePoint::Put, "unavailable");

        let err = wrapper.put((0..12).map(task).collect(), "bulk").await.unwrap_err();

        assert!(err.to_string().starts_with("WriteOperation failed"));
        assert_eq!(store.entity_count(), 0);
        assert_eq!(store.active_transactions(), 0);
    }

    #[tokio::test]
    async fn test_implicit_transaction_commits_all_chunks() {
        let store = limited_store();
        let wrapper = wrapper(&store, true);

        wrapper.put((0..12).map(task).collect(), "bulk").await.unwrap();
        assert_eq!(store.entity_count(), 12);
        assert_eq!(store.active_transactions(), 0);
    }

    #[tokio::test]
    async fn test_direct_failure_is_not_wrapped() {
        let store = limited_store();
        let wrapper = wrapper(&store, false);
        store.fail_next(FailurePoint::Lookup, "timeout");

        let err = wrapper.lookup(vec![key("a")], "id=a").await.unwrap_err();
        match err {
            StorageError::Backend { context, message } => {
                assert_eq!(context, "id=a; Lookup");
                assert_eq!(message, "timeout");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_active_transaction_receives_calls() {
        let store = limited_store();
        let wrapper = wrapper(&store, false);

        let scope = wrapper.begin().await.unwrap();
        wrapper.put(vec![task(1)], "t1").await.unwrap();
        assert_eq!(store.entity_count(), 0);

        let staged = wrapper.lookup(vec![key("t0001")], "t1").await.unwrap();
        assert!(staged[0].is_some());

        scope.commit().await.unwrap();
        assert_eq!(store.entity_count(), 1);
    }

    #[tokio::test]
    async fn test_closed_wrapper_rejects_calls() {
        let store = limited_store();
        let closed = Arc::new(AtomicBool::new(false));
        let wrapper = DatastoreWrapper::new(
            Arc::new(store.clone()),
            BatchLimits::default(),
            false,
            closed.clone(),
            None,
        );

        closed.store(true, Ordering::SeqCst);
        let result = wrapper.put(vec![task(1)], "t1").await;
        assert!(matches!(result, Err(StorageError::Closed)));
        assert_eq!(store.stats().puts, 0);
    }
}

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use super::query::compare_entities;
use super::{
    BatchLimits, Cursor, Datastore, DatastoreOps, DatastoreTransaction, Entity, EntityQuery, Key,
    QueryResults,
};
use crate::error::{Result, StorageError};
use crate::namespace::Namespace;

// ============================================================================
// In-Memory Datastore
// ============================================================================
//
// Behaves like the remote store as far as this crate can observe:
// - rejects calls that exceed the per-call read/write ceilings
// - returns query results in pages of at most `query_page_limit`, with
//   opaque cursors for continuation
// - transactions stage writes, see their own writes on lookup (queries see
//   committed data only) and apply everything atomically on commit
//
// Failures can be injected per call kind to exercise rollback paths.
//
// ============================================================================

pub const DEFAULT_QUERY_PAGE_LIMIT: usize = 1000;

const CURSOR_PREFIX: &str = "offset:";

/// Call kinds that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    Lookup,
    Put,
    Delete,
    Query,
    Commit,
}

/// Number of round-trips served so far, per call kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallStats {
    pub lookups: usize,
    pub puts: usize,
    pub deletes: usize,
    pub queries: usize,
}

#[derive(Default)]
struct CallCounters {
    lookups: AtomicUsize,
    puts: AtomicUsize,
    deletes: AtomicUsize,
    queries: AtomicUsize,
}

struct MemoryInner {
    entities: RwLock<BTreeMap<Key, Entity>>,
    limits: BatchLimits,
    query_page_limit: usize,
    active_transactions: AtomicUsize,
    next_transaction_id: AtomicU64,
    failures: Mutex<Vec<(FailurePoint, String)>>,
    counters: CallCounters,
}

impl MemoryInner {
    fn take_failure(&self, point: FailurePoint) -> Result<()> {
        let mut failures = self.failures.lock();
        if let Some(pos) = failures.iter().position(|(p, _)| *p == point) {
            let (_, message) = failures.remove(pos);
            return Err(StorageError::backend(format!("{point:?}"), message));
        }
        Ok(())
    }

    fn check_read_limit(&self, requested: usize) -> Result<()> {
        if requested > self.limits.read {
            return Err(StorageError::BatchLimitExceeded {
                limit: self.limits.read,
                requested,
            });
        }
        Ok(())
    }

    fn check_write_limit(&self, requested: usize) -> Result<()> {
        if requested > self.limits.write {
            return Err(StorageError::BatchLimitExceeded {
                limit: self.limits.write,
                requested,
            });
        }
        Ok(())
    }

    fn lookup(&self, keys: &[Key]) -> Result<Vec<Option<Entity>>> {
        self.counters.lookups.fetch_add(1, Ordering::Relaxed);
        self.take_failure(FailurePoint::Lookup)?;
        self.check_read_limit(keys.len())?;
        let entities = self.entities.read();
        Ok(keys.iter().map(|key| entities.get(key).cloned()).collect())
    }

    fn put(&self, batch: Vec<Entity>) -> Result<()> {
        self.counters.puts.fetch_add(1, Ordering::Relaxed);
        self.take_failure(FailurePoint::Put)?;
        self.check_write_limit(batch.len())?;
        let mut entities = self.entities.write();
        for entity in batch {
            entities.insert(entity.key.clone(), entity);
        }
        Ok(())
    }

    fn delete(&self, keys: &[Key]) -> Result<()> {
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        self.take_failure(FailurePoint::Delete)?;
        self.check_write_limit(keys.len())?;
        let mut entities = self.entities.write();
        for key in keys {
            entities.remove(key);
        }
        Ok(())
    }

    fn run_query(&self, query: &EntityQuery) -> Result<QueryResults> {
        self.counters.queries.fetch_add(1, Ordering::Relaxed);
        self.take_failure(FailurePoint::Query)?;

        let entities = self.entities.read();
        let mut matched: Vec<&Entity> = entities
            .values()
            .filter(|e| e.key.namespace == query.namespace && e.key.kind == query.kind)
            .filter(|e| query.filter.as_ref().map_or(true, |f| f.matches(e)))
            .collect();
        if !query.order.is_empty() {
            matched.sort_by(|a, b| compare_entities(&query.order, a, b));
        }

        let offset = match &query.start_cursor {
            Some(cursor) => decode_cursor(cursor)?.min(matched.len()),
            None => 0,
        };
        let take = query
            .limit
            .unwrap_or(usize::MAX)
            .min(self.query_page_limit)
            .min(matched.len() - offset);
        let end = offset + take;

        let page = matched[offset..end]
            .iter()
            .map(|e| if query.keys_only { e.key_only() } else { (*e).clone() })
            .collect();

        Ok(QueryResults {
            entities: page,
            end_cursor: Some(encode_cursor(end)),
            more_results: end < matched.len(),
        })
    }
}

fn encode_cursor(offset: usize) -> Cursor {
    Cursor::new(STANDARD.encode(format!("{CURSOR_PREFIX}{offset}")))
}

fn decode_cursor(cursor: &Cursor) -> Result<usize> {
    let invalid = || StorageError::backend("query", format!("invalid cursor {:?}", cursor.as_str()));
    let bytes = STANDARD.decode(cursor.as_str()).map_err(|_| invalid())?;
    let text = String::from_utf8(bytes).map_err(|_| invalid())?;
    text.strip_prefix(CURSOR_PREFIX)
        .and_then(|offset| offset.parse().ok())
        .ok_or_else(invalid)
}

#[derive(Clone)]
pub struct MemoryDatastore {
    inner: Arc<MemoryInner>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::with_limits(BatchLimits::default(), DEFAULT_QUERY_PAGE_LIMIT)
    }

    pub fn with_limits(limits: BatchLimits, query_page_limit: usize) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                entities: RwLock::new(BTreeMap::new()),
                limits,
                query_page_limit: query_page_limit.max(1),
                active_transactions: AtomicUsize::new(0),
                next_transaction_id: AtomicU64::new(1),
                failures: Mutex::new(Vec::new()),
                counters: CallCounters::default(),
            }),
        }
    }

    /// Makes the next call of kind `point` fail with `message`.
    pub fn fail_next(&self, point: FailurePoint, message: impl Into<String>) {
        self.inner.failures.lock().push((point, message.into()));
    }

    /// Transactions begun and not yet committed, rolled back or dropped.
    pub fn active_transactions(&self) -> usize {
        self.inner.active_transactions.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> CallStats {
        let c = &self.inner.counters;
        CallStats {
            lookups: c.lookups.load(Ordering::Relaxed),
            puts: c.puts.load(Ordering::Relaxed),
            deletes: c.deletes.load(Ordering::Relaxed),
            queries: c.queries.load(Ordering::Relaxed),
        }
    }

    pub fn entity_count(&self) -> usize {
        self.inner.entities.read().len()
    }
}

impl Default for MemoryDatastore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatastoreOps for MemoryDatastore {
    async fn lookup(&self, keys: &[Key]) -> Result<Vec<Option<Entity>>> {
        self.inner.lookup(keys)
    }

    async fn put(&self, entities: Vec<Entity>) -> Result<()> {
        self.inner.put(entities)
    }

    async fn delete(&self, keys: &[Key]) -> Result<()> {
        self.inner.delete(keys)
    }

    async fn run_query(&self, query: &EntityQuery) -> Result<QueryResults> {
        self.inner.run_query(query)
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn begin_transaction(&self) -> Result<Box<dyn DatastoreTransaction>> {
        let id = self.inner.next_transaction_id.fetch_add(1, Ordering::Relaxed);
        self.inner.active_transactions.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(transaction_id = id, "Memory transaction started");
        Ok(Box::new(MemoryTransaction {
            id,
            store: self.inner.clone(),
            staged: Mutex::new(BTreeMap::new()),
            finished: AtomicBool::new(false),
        }))
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        let entities = self.inner.entities.read();
        let namespaces: BTreeSet<Namespace> =
            entities.keys().map(|key| key.namespace.clone()).collect();
        Ok(namespaces.into_iter().collect())
    }
}

// ============================================================================
// Memory Transaction
// ============================================================================

struct MemoryTransaction {
    id: u64,
    store: Arc<MemoryInner>,
    /// `None` marks a staged delete.
    staged: Mutex<BTreeMap<Key, Option<Entity>>>,
    finished: AtomicBool,
}

impl MemoryTransaction {
    fn ensure_active(&self) -> Result<()> {
        if self.finished.load(Ordering::SeqCst) {
            return Err(StorageError::TransactionFinished);
        }
        Ok(())
    }

    /// Marks the transaction finished; true only for the first caller.
    fn finish(&self) -> bool {
        if self.finished.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.store.active_transactions.fetch_sub(1, Ordering::SeqCst);
        true
    }
}

#[async_trait]
impl DatastoreOps for MemoryTransaction {
    async fn lookup(&self, keys: &[Key]) -> Result<Vec<Option<Entity>>> {
        self.ensure_active()?;
        let mut found = self.store.lookup(keys)?;
        let staged = self.staged.lock();
        for (slot, key) in found.iter_mut().zip(keys) {
            if let Some(write) = staged.get(key) {
                *slot = write.clone();
            }
        }
        Ok(found)
    }

    async fn put(&self, entities: Vec<Entity>) -> Result<()> {
        self.ensure_active()?;
        self.store.counters.puts.fetch_add(1, Ordering::Relaxed);
        self.store.take_failure(FailurePoint::Put)?;
        self.store.check_write_limit(entities.len())?;
        let mut staged = self.staged.lock();
        for entity in entities {
            staged.insert(entity.key.clone(), Some(entity));
        }
        Ok(())
    }

    async fn delete(&self, keys: &[Key]) -> Result<()> {
        self.ensure_active()?;
        self.store.counters.deletes.fetch_add(1, Ordering::Relaxed);
        self.store.take_failure(FailurePoint::Delete)?;
        self.store.check_write_limit(keys.len())?;
        let mut staged = self.staged.lock();
        for key in keys {
            staged.insert(key.clone(), None);
        }
        Ok(())
    }

    async fn run_query(&self, query: &EntityQuery) -> Result<QueryResults> {
        self.ensure_active()?;
        self.store.run_query(query)
    }
}

#[async_trait]
impl DatastoreTransaction for MemoryTransaction {
    async fn commit(&self) -> Result<()> {
        self.ensure_active()?;
        self.store.take_failure(FailurePoint::Commit)?;

        let staged = std::mem::take(&mut *self.staged.lock());
        let writes = staged.len();
        {
            let mut entities = self.store.entities.write();
            for (key, write) in staged {
                match write {
                    Some(entity) => {
                        entities.insert(key, entity);
                    }
                    None => {
                        entities.remove(&key);
                    }
                }
            }
        }
        self.finish();
        tracing::trace!(transaction_id = self.id, writes, "Memory transaction committed");
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.ensure_active()?;
        self.staged.lock().clear();
        self.finish();
        tracing::trace!(transaction_id = self.id, "Memory transaction rolled back");
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.finish() {
            tracing::trace!(transaction_id = self.id, "Memory transaction released without commit");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::{Kind, NativeValue, OrderBy, PropertyFilter, ConjunctiveFilter};

    fn key(name: &str) -> Key {
        Key::new(Namespace::default(), Kind::new("Task"), name)
    }

    fn task(name: &str, priority: i64) -> Entity {
        Entity::new(key(name)).with("priority", NativeValue::Integer(priority))
    }

    #[tokio::test]
    async fn test_put_lookup_delete() {
        let store = MemoryDatastore::new();
        store.put(vec![task("a", 1), task("b", 2)]).await.unwrap();

        let found = store.lookup(&[key("b"), key("missing"), key("a")]).await.unwrap();
        assert_eq!(found[0].as_ref().unwrap().key.name, "b");
        assert!(found[1].is_none());
        assert_eq!(found[2].as_ref().unwrap().key.name, "a");

        store.delete(&[key("a"), key("missing")]).await.unwrap();
        assert_eq!(store.entity_count(), 1);
    }

    #[tokio::test]
    async fn test_batch_limits_are_enforced() {
        let store = MemoryDatastore::with_limits(BatchLimits { read: 2, write: 1 }, 10);
        let result = store.put(vec![task("a", 1), task("b", 2)]).await;
        assert!(matches!(result, Err(StorageError::BatchLimitExceeded { limit: 1, requested: 2 })));

        let result = store.lookup(&[key("a"), key("b"), key("c")]).await;
        assert!(matches!(result, Err(StorageError::BatchLimitExceeded { limit: 2, .. })));
    }

    #[tokio::test]
    async fn test_query_pages_with_cursor() {
        let store = MemoryDatastore::with_limits(BatchLimits::default(), 2);
        store
            .put((0..5).map(|i| task(&format!("t{i}"), i)).collect())
            .await
            .unwrap();

        let mut query = EntityQuery::new(Namespace::default(), Kind::new("Task"))
            .order_by(OrderBy::desc("priority"));
        let mut seen = Vec::new();
        loop {
            let page = store.run_query(&query).await.unwrap();
            assert!(page.entities.len() <= 2);
            seen.extend(page.entities.iter().map(|e| e.key.name.clone()));
            if !page.more_results {
                break;
            }
            query.start_cursor = page.end_cursor;
        }

        assert_eq!(seen, vec!["t4", "t3", "t2", "t1", "t0"]);
        assert_eq!(store.stats().queries, 3);
    }

    #[tokio::test]
    async fn test_query_filter_and_keys_only() {
        let store = MemoryDatastore::new();
        store.put(vec![task("a", 1), task("b", 2)]).await.unwrap();

        let query = EntityQuery::new(Namespace::default(), Kind::new("Task"))
            .with_filter(Some(ConjunctiveFilter::of(PropertyFilter::equal(
                "priority",
                NativeValue::Integer(2),
            ))))
            .keys_only();
        let results = store.run_query(&query).await.unwrap();

        assert_eq!(results.entities.len(), 1);
        assert_eq!(results.entities[0].key.name, "b");
        assert!(results.entities[0].properties.is_empty());
        assert!(!results.more_results);
    }

    #[tokio::test]
    async fn test_transaction_commit_is_atomic() {
        let store = MemoryDatastore::new();
        let tx = store.begin_transaction().await.unwrap();
        tx.put(vec![task("a", 1)]).await.unwrap();

        assert_eq!(store.entity_count(), 0);
        assert!(tx.lookup(&[key("a")]).await.unwrap()[0].is_some());

        tx.commit().await.unwrap();
        assert_eq!(store.entity_count(), 1);
        assert_eq!(store.active_transactions(), 0);
        assert!(matches!(tx.put(vec![task("b", 2)]).await, Err(StorageError::TransactionFinished)));
    }

    #[tokio::test]
    async fn test_transaction_rollback_and_drop_release() {
        let store = MemoryDatastore::new();

        let tx = store.begin_transaction().await.unwrap();
        tx.put(vec![task("a", 1)]).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(store.entity_count(), 0);

        let tx = store.begin_transaction().await.unwrap();
        tx.put(vec![task("b", 1)]).await.unwrap();
        assert_eq!(store.active_transactions(), 1);
        drop(tx);

        assert_eq!(store.active_transactions(), 0);
        assert_eq!(store.entity_count(), 0);
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let store = MemoryDatastore::new();
        store.fail_next(FailurePoint::Put, "unavailable");

        assert!(store.put(vec![task("a", 1)]).await.is_err());
        assert!(store.put(vec![task("a", 1)]).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_namespaces() {
        let store = MemoryDatastore::new();
        store
            .put(vec![
                task("a", 1),
                Entity::new(Key::new(Namespace::new("Vacme"), Kind::new("Task"), "b")),
            ])
            .await
            .unwrap();

        let namespaces = store.list_namespaces().await.unwrap();
        assert_eq!(namespaces, vec![Namespace::default(), Namespace::new("Vacme")]);
    }

    #[test]
    fn test_invalid_cursor_is_rejected() {
        assert!(decode_cursor(&Cursor::new("not base64!")).is_err());
        assert_eq!(decode_cursor(&encode_cursor(42)).unwrap(), 42);
    }
}

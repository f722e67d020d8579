// ============================================================================
// Datastore Contract - the remote document store we adapt
// ============================================================================
//
// Key-based get/put/delete, single-filter queries with ordering, limit and
// cursors, and transactions. The same four data operations exist on the
// direct path (`Datastore`) and the transactional path
// (`DatastoreTransaction`), so callers route to either one.
//
// `MemoryDatastore` is a complete in-process implementation.
//
// ============================================================================

pub mod entity;
pub mod memory;
pub mod query;
pub mod value;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::namespace::Namespace;

pub use entity::{Entity, Key, Kind};
pub use memory::MemoryDatastore;
pub use query::{
    compare_entities, ConjunctiveFilter, Cursor, Direction, EntityQuery, FilterOp, OrderBy,
    PropertyFilter, QueryResults,
};
pub use value::NativeValue;

/// Maximum number of keys per lookup call.
pub const MAX_KEYS_TO_READ_AT_ONCE: usize = 1000;
/// Maximum number of entities per put or delete call.
pub const MAX_ENTITIES_TO_WRITE_AT_ONCE: usize = 500;

/// Per-call item ceilings. Reads and writes have independent limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLimits {
    pub read: usize,
    pub write: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            read: MAX_KEYS_TO_READ_AT_ONCE,
            write: MAX_ENTITIES_TO_WRITE_AT_ONCE,
        }
    }
}

/// Data operations available both directly and inside a transaction.
#[async_trait]
pub trait DatastoreOps: Send + Sync {
    /// Looks up `keys`; the result has one slot per key, in input order.
    async fn lookup(&self, keys: &[Key]) -> Result<Vec<Option<Entity>>>;

    /// Inserts or overwrites `entities`.
    async fn put(&self, entities: Vec<Entity>) -> Result<()>;

    /// Deletes `keys`. Missing keys are not an error.
    async fn delete(&self, keys: &[Key]) -> Result<()>;

    /// Runs a query and returns one page of results.
    async fn run_query(&self, query: &EntityQuery) -> Result<QueryResults>;
}

#[async_trait]
pub trait Datastore: DatastoreOps {
    async fn begin_transaction(&self) -> Result<Box<dyn DatastoreTransaction>>;

    /// All namespaces currently holding data.
    async fn list_namespaces(&self) -> Result<Vec<Namespace>>;
}

/// A transaction on the store. Dropping it without commit releases it and
/// discards staged writes.
#[async_trait]
pub trait DatastoreTransaction: DatastoreOps {
    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;
}

// ============================================================================
// docstore_cqrs - record and aggregate storage on a schemaless document store
// ============================================================================
//
// Layers, leaves first:
// - namespace: tenant <-> namespace mapping and the namespace index
// - query:     boolean predicates and their compilation into native filters
// - column:    typed column values and their native mappings
// - datastore: the contract of the underlying store, plus an in-memory one
// - storage:   record storage, transactions, the storage factory
// - aggregate: event/snapshot history per aggregate
//
// ============================================================================

pub mod aggregate;
pub mod column;
pub mod config;
pub mod datastore;
pub mod error;
pub mod metrics;
pub mod namespace;
pub mod query;
pub mod storage;

pub use aggregate::{AggregateEventRecord, AggregateEventStore, AggregateHistory, Event, LifecycleFlags, Snapshot};
pub use column::{ColumnMapping, ColumnValue, ValueType};
pub use config::StorageConfig;
pub use datastore::{Datastore, MemoryDatastore};
pub use error::{OperationKind, Result, StorageError};
pub use metrics::StorageMetrics;
pub use namespace::{Namespace, NamespaceConverter, NamespaceResolver, TenantContext, TenantId};
pub use query::{LogicalOperator, Operator, Parameter, PredicateCompiler, QueryPredicate};
pub use storage::{Identified, Record, RecordId, RecordQuery, RecordStore, StorageFactory};

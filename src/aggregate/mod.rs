// ============================================================================
// Aggregate Storage - event/snapshot history per aggregate
// ============================================================================

pub mod record;
pub mod store;

pub use record::{AggregateEventRecord, AggregateHistory, Event, LifecycleFlags, Snapshot};
pub use store::AggregateEventStore;

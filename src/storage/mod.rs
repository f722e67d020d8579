// ============================================================================
// Record Storage - keyed CRUD over the datastore, per tenant namespace
// ============================================================================

pub mod factory;
pub mod key;
pub mod record;
pub mod store;
pub mod transaction;
pub mod wrapper;

pub use factory::StorageFactory;
pub use key::{KeyFactory, KeyFactoryCache, RecordId};
pub use record::{Identified, Record, RecordQuery, PAYLOAD_PROPERTY};
pub use store::RecordStore;
pub use transaction::{TransactionCoordinator, TransactionScope, TransactionState};
pub use wrapper::{DatastoreWrapper, Route};

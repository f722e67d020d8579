use parking_lot::Mutex;
use std::sync::Arc;

use crate::datastore::{Datastore, DatastoreTransaction};
use crate::error::{OperationKind, Result, StorageError};
use crate::metrics::StorageMetrics;

// ============================================================================
// Transaction Coordinator - one scoped transaction per storage handle
// ============================================================================
//
// State machine:
//
//   Idle -> Active (begin) -> Committed | RolledBack (commit / rollback)
//
// A finished handle can begin again. While a transaction is active every
// operation of the owning storage is routed to it instead of the direct path.
//
// `begin` hands out a `TransactionScope`; dropping the scope without commit
// or rollback releases the transaction and discards its staged writes.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Active,
    Committed,
    RolledBack,
}

struct Slot {
    state: TransactionState,
    transaction: Option<Arc<dyn DatastoreTransaction>>,
}

pub struct TransactionCoordinator {
    datastore: Arc<dyn Datastore>,
    slot: Mutex<Slot>,
    metrics: Option<Arc<StorageMetrics>>,
}

impl TransactionCoordinator {
    pub fn new(datastore: Arc<dyn Datastore>, metrics: Option<Arc<StorageMetrics>>) -> Self {
        Self {
            datastore,
            slot: Mutex::new(Slot {
                state: TransactionState::Idle,
                transaction: None,
            }),
            metrics,
        }
    }

    /// Starts a transaction. Fails fast if one is already active on this handle.
    pub async fn begin(&self) -> Result<TransactionScope<'_>> {
        {
            let mut slot = self.slot.lock();
            if slot.state == TransactionState::Active {
                return Err(StorageError::TransactionAlreadyActive);
            }
            // Reserve the slot before the round-trip so a concurrent begin fails.
            slot.state = TransactionState::Active;
            slot.transaction = None;
        }
        let reservation = Reservation {
            coordinator: self,
            armed: true,
        };

        match self.datastore.begin_transaction().await {
            Ok(transaction) => {
                reservation.fill(Arc::from(transaction));
                tracing::debug!("Transaction started");
                Ok(TransactionScope {
                    coordinator: self,
                    finished: false,
                })
            }
            Err(e) => {
                drop(reservation);
                tracing::error!(error = %e, "Failed to start transaction");
                Err(e)
            }
        }
    }

    /// The active transaction, if any.
    pub fn active(&self) -> Option<Arc<dyn DatastoreTransaction>> {
        let slot = self.slot.lock();
        match slot.state {
            TransactionState::Active => slot.transaction.clone(),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.slot.lock().state == TransactionState::Active
    }

    pub fn state(&self) -> TransactionState {
        self.slot.lock().state
    }

    /// Takes the active transaction out of the slot and moves to `next`.
    fn finish(&self, next: TransactionState) -> Result<Arc<dyn DatastoreTransaction>> {
        let mut slot = self.slot.lock();
        if slot.state != TransactionState::Active {
            return Err(StorageError::NoActiveTransaction);
        }
        slot.state = next;
        slot.transaction.take().ok_or(StorageError::NoActiveTransaction)
    }

    fn record(&self, committed: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_transaction(committed);
        }
    }
}

/// Slot reserved by a pending `begin`. Unless filled, it returns the handle
/// to `Idle` when dropped, including when the `begin` future itself is dropped.
struct Reservation<'a> {
    coordinator: &'a TransactionCoordinator,
    armed: bool,
}

impl Reservation<'_> {
    fn fill(mut self, transaction: Arc<dyn DatastoreTransaction>) {
        self.armed = false;
        self.coordinator.slot.lock().transaction = Some(transaction);
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut slot = self.coordinator.slot.lock();
            slot.state = TransactionState::Idle;
            slot.transaction = None;
        }
    }
}

/// Guard over the active transaction of a [`TransactionCoordinator`].
pub struct TransactionScope<'a> {
    coordinator: &'a TransactionCoordinator,
    finished: bool,
}

impl TransactionScope<'_> {
    /// Commits staged writes. A failed commit is rolled back and reported as
    /// a `CommitOperation` fault.
    pub async fn commit(mut self) -> Result<()> {
        self.finished = true;
        let transaction = self.coordinator.finish(TransactionState::Committed)?;

        match transaction.commit().await {
            Ok(()) => {
                self.coordinator.record(true);
                tracing::info!("Transaction committed");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Commit failed, rolling back");
                if let Err(rollback_error) = transaction.rollback().await {
                    tracing::warn!(error = %rollback_error, "Rollback after failed commit also failed");
                }
                self.coordinator.slot.lock().state = TransactionState::RolledBack;
                self.coordinator.record(false);
                Err(e.in_operation(OperationKind::Commit))
            }
        }
    }

    /// Discards staged writes.
    pub async fn rollback(mut self) -> Result<()> {
        self.finished = true;
        let transaction = self.coordinator.finish(TransactionState::RolledBack)?;
        self.coordinator.record(false);

        transaction.rollback().await.map_err(|e| {
            tracing::error!(error = %e, "Rollback failed");
            e.in_operation(OperationKind::Rollback)
        })?;
        tracing::info!("Transaction rolled back");
        Ok(())
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Dropping the last handle releases the transaction in the store.
        if self.coordinator.finish(TransactionState::RolledBack).is_ok() {
            self.coordinator.record(false);
            tracing::warn!("Transaction scope dropped without commit, staged writes discarded");
        }
    }
}

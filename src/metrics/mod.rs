use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

// ============================================================================
// Metrics Module - Prometheus metrics for storage operations
// ============================================================================
//
// Provides metrics for:
// - Datastore round-trips by operation (lookup, put, delete, query)
// - Entities written
// - Transaction outcomes (committed, rolled_back)
//
// The registry is owned here; exposing it is up to the embedding service.
// ============================================================================

pub struct StorageMetrics {
    registry: Registry,

    pub round_trips: IntCounterVec,
    pub round_trip_failures: IntCounterVec,
    pub entities_written: IntCounter,
    pub transactions: IntCounterVec,
}

impl StorageMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let round_trips = IntCounterVec::new(
            Opts::new("datastore_round_trips_total", "Total datastore calls"),
            &["operation"],
        )?;
        registry.register(Box::new(round_trips.clone()))?;

        let round_trip_failures = IntCounterVec::new(
            Opts::new("datastore_round_trip_failures_total", "Total failed datastore calls"),
            &["operation"],
        )?;
        registry.register(Box::new(round_trip_failures.clone()))?;

        let entities_written = IntCounter::new(
            "datastore_entities_written_total",
            "Total entities written to the datastore",
        )?;
        registry.register(Box::new(entities_written.clone()))?;

        let transactions = IntCounterVec::new(
            Opts::new("datastore_transactions_total", "Transactions by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(transactions.clone()))?;

        Ok(Self {
            registry,
            round_trips,
            round_trip_failures,
            entities_written,
            transactions,
        })
    }

    /// Get the Prometheus registry for exposing metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_round_trip(&self, operation: &str, success: bool) {
        self.round_trips.with_label_values(&[operation]).inc();
        if !success {
            self.round_trip_failures.with_label_values(&[operation]).inc();
        }
    }

    pub fn record_entities_written(&self, count: usize) {
        self.entities_written.inc_by(count as u64);
    }

    pub fn record_transaction(&self, committed: bool) {
        let outcome = if committed { "committed" } else { "rolled_back" };
        self.transactions.with_label_values(&[outcome]).inc();
    }
}

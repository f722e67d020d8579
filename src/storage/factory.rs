use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::key::{KeyFactoryCache, RecordId};
use super::store::RecordStore;
use super::wrapper::DatastoreWrapper;
use crate::aggregate::AggregateEventStore;
use crate::column::ColumnMapping;
use crate::config::StorageConfig;
use crate::datastore::{BatchLimits, Datastore, Kind};
use crate::error::Result;
use crate::metrics::StorageMetrics;
use crate::namespace::{NamespaceIndex, NamespaceResolver, TenantId};

// ============================================================================
// Storage Factory - creates storages sharing one datastore and one set of caches
// ============================================================================
//
// The namespace index and the key-factory cache live here, not in globals:
// two factories never share entries. Closing the factory makes every storage
// it created fail with `Closed`.
//
// ============================================================================

/// Shared pieces every storage of a factory works with.
#[derive(Clone)]
pub(crate) struct StorageContext {
    pub resolver: NamespaceResolver,
    pub index: Arc<NamespaceIndex>,
    pub mapping: Arc<ColumnMapping>,
    pub keys: Arc<KeyFactoryCache>,
    pub page_size: usize,
}

pub struct StorageFactory {
    datastore: Arc<dyn Datastore>,
    config: StorageConfig,
    context: StorageContext,
    metrics: Option<Arc<StorageMetrics>>,
    closed: Arc<AtomicBool>,
}

impl StorageFactory {
    pub fn new(datastore: Arc<dyn Datastore>, config: StorageConfig) -> Result<Self> {
        let index = Arc::new(NamespaceIndex::new(datastore.clone()));
        let resolver = config.resolver()?.with_index(index.clone());

        tracing::info!(
            multitenant = resolver.is_multitenant(),
            transactional = config.transactional,
            read_batch_limit = config.read_batch_limit,
            write_batch_limit = config.write_batch_limit,
            "Storage factory created"
        );

        Ok(Self {
            datastore,
            context: StorageContext {
                resolver,
                index,
                mapping: Arc::new(ColumnMapping::new()),
                keys: Arc::new(KeyFactoryCache::new()),
                page_size: config.page_size.max(1),
            },
            config,
            metrics: None,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Replaces the column mapping used by storages created afterwards.
    pub fn with_mapping(mut self, mapping: ColumnMapping) -> Self {
        self.context.mapping = Arc::new(mapping);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<StorageMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn wrapper(&self) -> DatastoreWrapper {
        DatastoreWrapper::new(
            self.datastore.clone(),
            BatchLimits {
                read: self.config.read_batch_limit.max(1),
                write: self.config.write_batch_limit.max(1),
            },
            self.config.transactional,
            self.closed.clone(),
            self.metrics.clone(),
        )
    }

    /// A record storage for `kind`, with its own transaction handle.
    pub fn record_store<I: RecordId>(&self, kind: impl Into<Kind>) -> RecordStore<I> {
        let kind = kind.into();
        tracing::debug!(kind = %kind, "Record storage created");
        RecordStore::new(kind, self.wrapper(), self.context.clone())
    }

    /// An aggregate storage for `kind`, with its own transaction handle.
    pub fn aggregate_store<I: RecordId>(&self, kind: impl Into<Kind>) -> AggregateEventStore<I> {
        let kind = kind.into();
        tracing::debug!(kind = %kind, "Aggregate storage created");
        AggregateEventStore::new(kind, self.wrapper(), self.context.clone())
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn resolver(&self) -> &NamespaceResolver {
        &self.context.resolver
    }

    pub fn index(&self) -> &Arc<NamespaceIndex> {
        &self.context.index
    }

    pub fn key_cache(&self) -> &KeyFactoryCache {
        &self.context.keys
    }

    /// Every tenant with data in the store.
    pub async fn all_tenants(&self) -> Result<Vec<TenantId>> {
        self.context.resolver.all_tenants().await
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::info!("Storage factory closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{ColumnValue, ValueType};
    use crate::datastore::{MemoryDatastore, NativeValue};
    use crate::error::StorageError;
    use crate::namespace::TenantContext;
    use crate::storage::Record;

    #[tokio::test]
    async fn test_all_tenants_lists_written_tenants() {
        let factory =
            StorageFactory::new(Arc::new(MemoryDatastore::new()), StorageConfig::multitenant())
                .unwrap();
        let tasks = factory.record_store::<String>("Task");

        for tenant in [TenantId::value("acme"), TenantId::email("ops@globex.com")] {
            TenantContext::scope(tenant, async {
                tasks.write(&Record::new("a".to_string(), Vec::new())).await.unwrap();
            })
            .await;
        }

        let tenants = factory.all_tenants().await.unwrap();
        assert_eq!(
            tenants,
            vec![TenantId::email("ops@globex.com"), TenantId::value("acme")]
        );
    }

    #[tokio::test]
    async fn test_factories_do_not_share_caches() {
        let store = Arc::new(MemoryDatastore::new());
        let first = StorageFactory::new(store.clone(), StorageConfig::single_tenant()).unwrap();
        let second = StorageFactory::new(store, StorageConfig::single_tenant()).unwrap();

        first
            .record_store::<String>("Task")
            .write(&Record::new("a".to_string(), Vec::new()))
            .await
            .unwrap();

        assert_eq!(first.key_cache().len(), 1);
        assert!(second.key_cache().is_empty());
    }

    #[tokio::test]
    async fn test_custom_mapping_is_used() {
        let mapping = ColumnMapping::new().with(ValueType::Named("Money".into()), |value| {
            match value {
                ColumnValue::Custom { value, .. } => Ok(NativeValue::Integer(
                    value["cents"].as_i64().unwrap_or_default(),
                )),
                other => Err(StorageError::UnmappedColumnType(other.value_type())),
            }
        });
        let store = MemoryDatastore::new();
        let factory = StorageFactory::new(Arc::new(store.clone()), StorageConfig::single_tenant())
            .unwrap()
            .with_mapping(mapping);
        let tasks = factory.record_store::<String>("Invoice");

        let record = Record::new("i1".to_string(), Vec::new()).with_column(
            "total",
            ColumnValue::Custom {
                type_name: "Money".into(),
                value: serde_json::json!({"cents": 1250}),
            },
        );
        tasks.write(&record).await.unwrap();

        let read = tasks.read(&"i1".to_string()).await.unwrap().unwrap();
        assert_eq!(read.column("total"), Some(&ColumnValue::Int64(1250)));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = StorageConfig {
            tenancy: crate::config::TenancyConfig::Multi {
                converter: crate::config::ConverterConfig::Prefixed {
                    prefix: String::new(),
                },
            },
            ..StorageConfig::default()
        };
        let result = StorageFactory::new(Arc::new(MemoryDatastore::new()), config);
        assert!(matches!(result, Err(StorageError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let factory =
            StorageFactory::new(Arc::new(MemoryDatastore::new()), StorageConfig::default()).unwrap();
        assert!(!factory.is_closed());
        factory.close();
        factory.close();
        assert!(factory.is_closed());
    }
}

use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use docstore_cqrs::datastore::OrderBy;
use docstore_cqrs::{
    AggregateEventRecord, Event, Identified, LifecycleFlags, MemoryDatastore, Parameter,
    QueryPredicate, Record, RecordQuery, Snapshot, StorageConfig, StorageFactory, StorageMetrics,
    TenantContext, TenantId,
};

#[derive(Debug, Serialize, Deserialize)]
struct Task {
    id: String,
    title: String,
    priority: i64,
    owner: String,
}

impl Identified for Task {
    type Id = String;

    fn id(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Serialize, Deserialize)]
enum OrderEvent {
    Placed { total: u32 },
    ItemAdded { sku: String },
    Shipped,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,docstore_cqrs=debug")),
        )
        .init();

    tracing::info!("🚀 Starting document store storage demo");

    // === 1. Datastore, metrics and factory ===
    let datastore = MemoryDatastore::new();
    let metrics = Arc::new(StorageMetrics::new()?);
    let factory = StorageFactory::new(Arc::new(datastore.clone()), StorageConfig::multitenant())?
        .with_metrics(metrics.clone());

    let tenant = TenantId::email("ops@example.com");
    let namespace = factory.resolver().resolve(&tenant)?;
    tracing::info!(tenant = %tenant, namespace = %namespace, "Tenant resolved");

    TenantContext::scope(tenant, async {
        // === 2. Records ===
        let tasks = factory.record_store::<String>("Task");
        let seed = [
            ("t1", "write docs", 1, "ann"),
            ("t2", "fix build", 3, "bob"),
            ("t3", "release", 5, "ann"),
            ("t4", "triage", 2, "cid"),
        ];
        let mut records = Vec::with_capacity(seed.len());
        for (id, title, priority, owner) in seed {
            let task = Task {
                id: id.to_string(),
                title: title.to_string(),
                priority,
                owner: owner.to_string(),
            };
            records.push(
                Record::of(&task)?
                    .with_column("priority", task.priority)
                    .with_column("owner", task.owner.as_str()),
            );
        }
        tasks.write_all(&records).await?;

        // === 3. OR query: owned by cid, or priority >= 3 ===
        let predicate = QueryPredicate::any(vec![
            Parameter::eq("owner", "cid"),
            Parameter::ge("priority", 3i64),
        ]);
        let query = RecordQuery::matching(predicate).order_by(OrderBy::desc("priority"));
        let matched: Vec<Record<String>> = tasks.read_all_records(query).try_collect().await?;
        for record in &matched {
            let task: Task = record.payload_as()?;
            tracing::info!(id = %task.id, title = %task.title, priority = task.priority, "✅ Matched task");
        }

        // === 4. Aggregate history ===
        let orders = factory.aggregate_store::<String>("Order");
        let order_id = "o-1001".to_string();

        let tx = orders.begin_transaction().await?;
        orders.write_record(&order_id, &Event::of(1, &OrderEvent::Placed { total: 120 })?.into()).await?;
        orders.write_record(&order_id, &Event::of(2, &OrderEvent::ItemAdded { sku: "A-7".into() })?.into()).await?;
        orders.write_record(&order_id, &Snapshot::of(2, &serde_json::json!({"total": 120, "items": 1}))?.into()).await?;
        orders.write_record(&order_id, &Event::of(3, &OrderEvent::Shipped)?.into()).await?;
        orders.write_event_count_after_last_snapshot(&order_id, 1).await?;
        tx.commit().await?;

        let mut history = orders.history_backward(&order_id, 2);
        while let Some(record) = history.try_next().await? {
            match record {
                AggregateEventRecord::Event(event) => {
                    let payload: OrderEvent = event.payload_as()?;
                    tracing::info!(version = event.version, event = ?payload, "📝 Event");
                }
                AggregateEventRecord::Snapshot(snapshot) => {
                    tracing::info!(version = snapshot.version, "📸 Snapshot");
                }
            }
        }

        let replay = orders.read_history(&order_id, 2).await?;
        if let Some(replay) = replay {
            tracing::info!(
                snapshot_version = ?replay.snapshot.as_ref().map(|s| s.version),
                events_after_snapshot = replay.events.len(),
                "Aggregate replay prepared"
            );
        }

        orders.write_lifecycle_flags(&order_id, LifecycleFlags::archived()).await?;
        let flags = orders.read_lifecycle_flags(&order_id).await?;
        tracing::info!(?flags, "Lifecycle flags");

        anyhow::Ok(())
    })
    .await?;

    // === 5. Summary ===
    let tenants = factory.all_tenants().await?;
    tracing::info!(tenants = ?tenants, entities = datastore.entity_count(), "Tenants with data");
    tracing::info!(
        "📊 Metrics registry holds {} metric families",
        metrics.registry().gather().len()
    );

    factory.close();
    tracing::info!("Demo finished");
    Ok(())
}

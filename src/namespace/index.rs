use dashmap::DashSet;
use std::sync::Arc;

use super::name::Namespace;
use crate::datastore::Datastore;
use crate::error::{Result, StorageError};

// ============================================================================
// Namespace Index - append-only cache of namespaces known to exist
// ============================================================================
//
// Entries are inserted once and never evicted, so concurrent readers need no
// coordination. A miss triggers exactly one refresh scan of the store.
//
// ============================================================================

pub struct NamespaceIndex {
    datastore: Arc<dyn Datastore>,
    known: DashSet<Namespace>,
}

impl NamespaceIndex {
    pub fn new(datastore: Arc<dyn Datastore>) -> Self {
        Self {
            datastore,
            known: DashSet::new(),
        }
    }

    /// Records a namespace this process has written to.
    pub fn keep(&self, namespace: &Namespace) {
        if !self.known.contains(namespace) && self.known.insert(namespace.clone()) {
            tracing::debug!(namespace = %namespace, "Namespace registered");
        }
    }

    /// Checks the cache, refreshing it once from the store on a miss.
    pub async fn contains(&self, namespace: &Namespace) -> Result<bool> {
        if self.known.contains(namespace) {
            return Ok(true);
        }
        self.refresh().await?;
        Ok(self.known.contains(namespace))
    }

    /// Like [`NamespaceIndex::contains`], but a miss after the refresh is a hard failure.
    pub async fn validate(&self, namespace: &Namespace) -> Result<()> {
        if self.contains(namespace).await? {
            return Ok(());
        }
        tracing::warn!(namespace = %namespace, "Namespace not found in the datastore");
        Err(StorageError::NamespaceNotFound(namespace.to_string()))
    }

    /// Reloads every namespace from the store and returns the full set.
    pub async fn all(&self) -> Result<Vec<Namespace>> {
        self.refresh().await?;
        let mut namespaces: Vec<Namespace> = self.known.iter().map(|ns| ns.clone()).collect();
        namespaces.sort();
        Ok(namespaces)
    }

    async fn refresh(&self) -> Result<()> {
        let namespaces = self
            .datastore
            .list_namespaces()
            .await
            .map_err(|e| e.with_context("listing namespaces"))?;
        let count = namespaces.len();
        for namespace in namespaces {
            self.known.insert(namespace);
        }
        tracing::debug!(count, "Namespace index refreshed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::{DatastoreOps, Entity, Key, Kind, MemoryDatastore};

    async fn store_with(namespace: &str) -> MemoryDatastore {
        let store = MemoryDatastore::new();
        store
            .put(vec![Entity::new(Key::new(
                Namespace::new(namespace),
                Kind::new("Task"),
                "a",
            ))])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_miss_triggers_refresh() {
        let store = store_with("Vacme").await;
        let index = NamespaceIndex::new(Arc::new(store.clone()));

        assert!(index.contains(&Namespace::new("Vacme")).await.unwrap());
        assert!(index.validate(&Namespace::new("Vacme")).await.is_ok());
    }

    #[tokio::test]
    async fn test_validate_fails_hard_for_unknown_namespace() {
        let store = store_with("Vacme").await;
        let index = NamespaceIndex::new(Arc::new(store));

        let result = index.validate(&Namespace::new("Vother")).await;
        assert!(matches!(result, Err(StorageError::NamespaceNotFound(ns)) if ns == "Vother"));
    }

    #[tokio::test]
    async fn test_kept_namespace_is_known_without_store_data() {
        let index = NamespaceIndex::new(Arc::new(MemoryDatastore::new()));
        index.keep(&Namespace::new("Vfresh"));
        assert!(index.contains(&Namespace::new("Vfresh")).await.unwrap());
    }

    #[tokio::test]
    async fn test_all_merges_cache_and_store() {
        let store = store_with("Va").await;
        let index = NamespaceIndex::new(Arc::new(store));
        index.keep(&Namespace::new("Vb"));

        let all = index.all().await.unwrap();
        assert_eq!(all, vec![Namespace::new("Va"), Namespace::new("Vb")]);
    }
}

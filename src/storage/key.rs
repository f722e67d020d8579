use dashmap::DashMap;
use std::fmt::Debug;
use std::sync::Arc;
use uuid::Uuid;

use crate::datastore::{Key, Kind};
use crate::error::{Result, StorageError};
use crate::namespace::Namespace;

// ============================================================================
// Record Identifiers and Key Factories
// ============================================================================

/// An identifier type that can be stored as a key name and parsed back.
pub trait RecordId: Clone + Debug + Send + Sync + 'static {
    fn to_key_name(&self) -> String;

    fn from_key_name(name: &str) -> Result<Self>;
}

impl RecordId for String {
    fn to_key_name(&self) -> String {
        self.clone()
    }

    fn from_key_name(name: &str) -> Result<Self> {
        Ok(name.to_string())
    }
}

impl RecordId for Uuid {
    fn to_key_name(&self) -> String {
        self.to_string()
    }

    fn from_key_name(name: &str) -> Result<Self> {
        Uuid::parse_str(name)
            .map_err(|e| StorageError::InvalidIdentifier(format!("{name:?} is not a UUID: {e}")))
    }
}

impl RecordId for i64 {
    fn to_key_name(&self) -> String {
        self.to_string()
    }

    fn from_key_name(name: &str) -> Result<Self> {
        name.parse()
            .map_err(|_| StorageError::InvalidIdentifier(format!("{name:?} is not an i64")))
    }
}

impl RecordId for u64 {
    fn to_key_name(&self) -> String {
        self.to_string()
    }

    fn from_key_name(name: &str) -> Result<Self> {
        name.parse()
            .map_err(|_| StorageError::InvalidIdentifier(format!("{name:?} is not a u64")))
    }
}

/// Builds keys of one kind in one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFactory {
    namespace: Namespace,
    kind: Kind,
}

impl KeyFactory {
    pub fn new(namespace: Namespace, kind: Kind) -> Self {
        Self { namespace, kind }
    }

    pub fn key<I: RecordId>(&self, id: &I) -> Key {
        self.named(id.to_key_name())
    }

    pub fn named(&self, name: impl Into<String>) -> Key {
        Key::new(self.namespace.clone(), self.kind.clone(), name)
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }
}

/// Key factories per (namespace, kind). Populated once per pair, never evicted.
#[derive(Debug, Default)]
pub struct KeyFactoryCache {
    factories: DashMap<(Namespace, Kind), Arc<KeyFactory>>,
}

impl KeyFactoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, namespace: &Namespace, kind: &Kind) -> Arc<KeyFactory> {
        let cache_key = (namespace.clone(), kind.clone());
        if let Some(factory) = self.factories.get(&cache_key) {
            return factory.clone();
        }
        self.factories
            .entry(cache_key)
            .or_insert_with(|| Arc::new(KeyFactory::new(namespace.clone(), kind.clone())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_round_trips() {
        let uuid = Uuid::new_v4();
        assert_eq!(Uuid::from_key_name(&uuid.to_key_name()).unwrap(), uuid);
        assert_eq!(i64::from_key_name(&(-42i64).to_key_name()).unwrap(), -42);
        assert_eq!(u64::from_key_name("7").unwrap(), 7);
        assert_eq!(String::from_key_name("a1").unwrap(), "a1");
    }

    #[test]
    fn test_invalid_key_names() {
        assert!(matches!(
            Uuid::from_key_name("not-a-uuid"),
            Err(StorageError::InvalidIdentifier(_))
        ));
        assert!(matches!(u64::from_key_name("-1"), Err(StorageError::InvalidIdentifier(_))));
    }

    #[test]
    fn test_cache_returns_same_factory() {
        let cache = KeyFactoryCache::new();
        let first = cache.get(&Namespace::default(), &Kind::new("Task"));
        let second = cache.get(&Namespace::default(), &Kind::new("Task"));
        let other = cache.get(&Namespace::new("Vacme"), &Kind::new("Task"));

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_factory_builds_keys() {
        let factory = KeyFactory::new(Namespace::new("Vacme"), Kind::new("Task"));
        let key = factory.key(&"a1".to_string());
        assert_eq!(key.to_string(), "Vacme/Task/a1");
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::value::NativeValue;
use crate::namespace::Namespace;

/// The store's notion of an entity type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kind(String);

impl Kind {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A sibling kind holding side values for this one, e.g. `Task.EventCount`.
    pub fn child(&self, suffix: &str) -> Kind {
        Kind(format!("{}.{suffix}", self.0))
    }
}

impl From<&str> for Kind {
    fn from(name: &str) -> Self {
        Kind::new(name)
    }
}

impl From<String> for Kind {
    fn from(name: String) -> Self {
        Kind(name)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key {
    pub namespace: Namespace,
    pub kind: Kind,
    pub name: String,
}

impl Key {
    pub fn new(namespace: Namespace, kind: Kind, name: impl Into<String>) -> Self {
        Self {
            namespace,
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub key: Key,
    pub properties: BTreeMap<String, NativeValue>,
}

impl Entity {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            properties: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: NativeValue) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: NativeValue) {
        self.properties.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&NativeValue> {
        self.properties.get(name)
    }

    /// Same entity with its properties dropped, as returned by keys-only queries.
    pub fn key_only(&self) -> Entity {
        Entity::new(self.key.clone())
    }
}

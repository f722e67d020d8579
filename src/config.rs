use serde::{Deserialize, Serialize};

use crate::datastore::{MAX_ENTITIES_TO_WRITE_AT_ONCE, MAX_KEYS_TO_READ_AT_ONCE};
use crate::error::Result;
use crate::namespace::{NamespaceConverter, NamespaceResolver};

// ============================================================================
// Storage Configuration
// ============================================================================
//
// Deployment-level settings for a storage factory. Loadable from JSON; every
// field has a default, so `{}` is a valid single-tenant configuration.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TenancyConfig {
    Single {
        #[serde(default)]
        namespace: String,
    },
    Multi {
        #[serde(default)]
        converter: ConverterConfig,
    },
}

impl Default for TenancyConfig {
    fn default() -> Self {
        TenancyConfig::Single {
            namespace: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConverterConfig {
    /// Tenant-type tagged namespaces.
    #[default]
    Default,
    /// Tagged namespaces behind a fixed prefix.
    Prefixed { prefix: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub tenancy: TenancyConfig,
    /// Wrap every read and write in its own transaction.
    pub transactional: bool,
    /// Maximum keys per lookup call.
    pub read_batch_limit: usize,
    /// Maximum entities per put/delete call.
    pub write_batch_limit: usize,
    /// Page size for lazy index and query scans.
    pub page_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            tenancy: TenancyConfig::default(),
            transactional: false,
            read_batch_limit: MAX_KEYS_TO_READ_AT_ONCE,
            write_batch_limit: MAX_ENTITIES_TO_WRITE_AT_ONCE,
            page_size: 500,
        }
    }
}

impl StorageConfig {
    /// Single tenant in the default namespace.
    pub fn single_tenant() -> Self {
        Self::default()
    }

    /// Multitenant with the default namespace converter.
    pub fn multitenant() -> Self {
        Self {
            tenancy: TenancyConfig::Multi {
                converter: ConverterConfig::Default,
            },
            ..Self::default()
        }
    }

    pub fn transactional(mut self, enabled: bool) -> Self {
        self.transactional = enabled;
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Builds the namespace resolver this configuration describes.
    pub fn resolver(&self) -> Result<NamespaceResolver> {
        match &self.tenancy {
            TenancyConfig::Single { namespace } => NamespaceResolver::single_tenant(namespace),
            TenancyConfig::Multi { converter } => {
                let converter = match converter {
                    ConverterConfig::Default => NamespaceConverter::tagged(),
                    ConverterConfig::Prefixed { prefix } => {
                        NamespaceConverter::tagged().prefixed(prefix.clone())?
                    }
                };
                Ok(NamespaceResolver::multitenant(converter))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::TenantId;

    #[test]
    fn test_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.read_batch_limit, 1000);
        assert_eq!(config.write_batch_limit, 500);
        assert!(!config.transactional);
        assert_eq!(config.tenancy, TenancyConfig::Single { namespace: String::new() });
    }

    #[test]
    fn test_empty_json_is_default() {
        assert_eq!(StorageConfig::from_json("{}").unwrap(), StorageConfig::default());
    }

    #[test]
    fn test_multitenant_json() {
        let config = StorageConfig::from_json(
            r#"{
                "tenancy": {"mode": "multi", "converter": {"kind": "prefixed", "prefix": "crm"}},
                "transactional": true,
                "write_batch_limit": 100
            }"#,
        )
        .unwrap();

        assert!(config.transactional);
        assert_eq!(config.write_batch_limit, 100);
        assert_eq!(config.read_batch_limit, 1000);

        let resolver = config.resolver().unwrap();
        assert!(resolver.is_multitenant());
        assert_eq!(
            resolver.resolve(&TenantId::value("acme")).unwrap().as_str(),
            "crm.Vacme"
        );
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(StorageConfig::from_json(r#"{"tenancy": {"mode": "bogus"}}"#).is_err());
    }
}

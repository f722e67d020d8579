use std::sync::Arc;

use super::converter::NamespaceConverter;
use super::index::NamespaceIndex;
use super::name::Namespace;
use super::tenant::{TenantContext, TenantId};
use crate::error::{Result, StorageError};

// ============================================================================
// Namespace Resolver - tenant <-> namespace mapping
// ============================================================================
//
// Single-tenant mode: one constant namespace, computed once at construction.
// Multitenant mode: the namespace is derived from the tenant of the current
// task at call time, through a pluggable converter.
//
// ============================================================================

#[derive(Debug, Clone)]
enum Tenancy {
    Single(Namespace),
    Multi(NamespaceConverter),
}

#[derive(Clone)]
pub struct NamespaceResolver {
    tenancy: Tenancy,
    index: Option<Arc<NamespaceIndex>>,
}

impl NamespaceResolver {
    pub fn single_tenant(namespace: &str) -> Result<Self> {
        Ok(Self {
            tenancy: Tenancy::Single(Namespace::from_encoded(namespace)?),
            index: None,
        })
    }

    pub fn multitenant(converter: NamespaceConverter) -> Self {
        Self {
            tenancy: Tenancy::Multi(converter),
            index: None,
        }
    }

    /// Attaches the index used by [`NamespaceResolver::validate`].
    pub fn with_index(mut self, index: Arc<NamespaceIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn is_multitenant(&self) -> bool {
        matches!(self.tenancy, Tenancy::Multi(_))
    }

    /// Namespace of `tenant`. Single-tenant mode ignores the tenant.
    pub fn resolve(&self, tenant: &TenantId) -> Result<Namespace> {
        match &self.tenancy {
            Tenancy::Single(namespace) => Ok(namespace.clone()),
            Tenancy::Multi(converter) => Namespace::from_encoded(&converter.encode(tenant)?),
        }
    }

    /// Namespace of the tenant bound to the current task.
    pub fn current(&self) -> Result<Namespace> {
        match &self.tenancy {
            Tenancy::Single(namespace) => Ok(namespace.clone()),
            Tenancy::Multi(_) => {
                let tenant = TenantContext::current().ok_or_else(|| {
                    StorageError::Configuration(
                        "multitenant storage used without a current tenant".to_string(),
                    )
                })?;
                self.resolve(&tenant)
            }
        }
    }

    /// Tenant a namespace was computed from.
    pub fn restore(&self, namespace: &Namespace) -> Result<TenantId> {
        match &self.tenancy {
            Tenancy::Single(_) => Err(StorageError::Configuration(
                "single-tenant storage has no tenant namespaces".to_string(),
            )),
            Tenancy::Multi(converter) => converter.decode(&namespace.to_encoded()),
        }
    }

    /// True when `namespace` exists in the store; fails hard when it does not.
    pub async fn validate(&self, namespace: &Namespace) -> Result<bool> {
        let index = self.index.as_ref().ok_or_else(|| {
            StorageError::Configuration("namespace resolver has no index attached".to_string())
        })?;
        index.validate(namespace).await?;
        Ok(true)
    }

    /// Every tenant with a namespace in the store. Namespaces this converter
    /// cannot decode (the default namespace, foreign prefixes) are skipped.
    pub async fn all_tenants(&self) -> Result<Vec<TenantId>> {
        if !self.is_multitenant() {
            return Err(StorageError::Configuration(
                "single-tenant storage has no tenant namespaces".to_string(),
            ));
        }
        let index = self.index.as_ref().ok_or_else(|| {
            StorageError::Configuration("namespace resolver has no index attached".to_string())
        })?;

        let mut tenants = Vec::new();
        for namespace in index.all().await? {
            match self.restore(&namespace) {
                Ok(tenant) => tenants.push(tenant),
                Err(e) => {
                    tracing::debug!(namespace = %namespace, error = %e, "Skipping foreign namespace");
                }
            }
        }
        Ok(tenants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::MemoryDatastore;
    use proptest::prelude::*;

    fn tenant_strategy() -> impl Strategy<Value = TenantId> {
        let value = "[a-z0-9._@-]{0,24}";
        prop_oneof![
            value.prop_map(TenantId::Domain),
            value.prop_map(TenantId::Email),
            value.prop_map(TenantId::Value),
        ]
    }

    proptest! {
        #[test]
        fn test_restore_inverts_resolve(tenant in tenant_strategy(), prefixed in any::<bool>()) {
            let converter = if prefixed {
                NamespaceConverter::tagged().prefixed("crm").unwrap()
            } else {
                NamespaceConverter::tagged()
            };
            let resolver = NamespaceResolver::multitenant(converter);

            match resolver.resolve(&tenant) {
                Ok(namespace) => {
                    prop_assert!(!namespace.as_str().contains('@'));
                    prop_assert_eq!(resolver.restore(&namespace).unwrap(), tenant);
                }
                Err(e) => prop_assert!(matches!(e, StorageError::Configuration(_))),
            }
        }

        #[test]
        fn test_distinct_tenants_never_share_a_namespace(
            first in tenant_strategy(),
            second in tenant_strategy(),
        ) {
            let resolver = NamespaceResolver::multitenant(NamespaceConverter::tagged());
            if let (Ok(a), Ok(b)) = (resolver.resolve(&first), resolver.resolve(&second)) {
                prop_assert_eq!(a == b, first == second);
            }
        }
    }

    #[test]
    fn test_single_tenant_returns_constant_namespace() {
        let resolver = NamespaceResolver::single_tenant("").unwrap();
        assert_eq!(resolver.current().unwrap(), Namespace::default());
        assert_eq!(
            resolver.resolve(&TenantId::value("ignored")).unwrap(),
            Namespace::default()
        );
        assert!(!resolver.is_multitenant());
    }

    #[test]
    fn test_single_tenant_namespace_is_escaped() {
        let resolver = NamespaceResolver::single_tenant("ops@example.com").unwrap();
        assert_eq!(resolver.current().unwrap().as_str(), "ops-at-example.com");
    }

    #[test]
    fn test_email_tenant_round_trip() {
        let resolver = NamespaceResolver::multitenant(NamespaceConverter::tagged());
        let tenant = TenantId::email("tenant@example.com");

        let namespace = resolver.resolve(&tenant).unwrap();
        assert_eq!(namespace.as_str(), "Etenant-at-example.com");
        assert_eq!(resolver.restore(&namespace).unwrap(), tenant);
    }

    #[test]
    fn test_ambiguous_email_tenant_is_rejected() {
        let resolver = NamespaceResolver::multitenant(NamespaceConverter::tagged());

        let result = resolver.resolve(&TenantId::email("john-at@example.com"));
        assert!(matches!(result, Err(StorageError::Configuration(_))));

        let tenant = TenantId::email("john-a@example.com");
        let namespace = resolver.resolve(&tenant).unwrap();
        assert_eq!(resolver.restore(&namespace).unwrap(), tenant);
    }

    #[test]
    fn test_prefixed_round_trip() {
        let converter = NamespaceConverter::tagged().prefixed("legacy").unwrap();
        let resolver = NamespaceResolver::multitenant(converter);
        let tenant = TenantId::domain("example.org");

        let namespace = resolver.resolve(&tenant).unwrap();
        assert_eq!(namespace.as_str(), "legacy.Dexample.org");
        assert_eq!(resolver.restore(&namespace).unwrap(), tenant);
    }

    #[tokio::test]
    async fn test_multitenant_reads_ambient_tenant() {
        let resolver = NamespaceResolver::multitenant(NamespaceConverter::tagged());
        assert!(matches!(resolver.current(), Err(StorageError::Configuration(_))));

        let namespace = TenantContext::scope(TenantId::value("acme"), async { resolver.current() })
            .await
            .unwrap();
        assert_eq!(namespace.as_str(), "Vacme");
    }

    #[tokio::test]
    async fn test_validate_uses_index() {
        let index = Arc::new(NamespaceIndex::new(Arc::new(MemoryDatastore::new())));
        index.keep(&Namespace::new("Vacme"));
        let resolver =
            NamespaceResolver::multitenant(NamespaceConverter::tagged()).with_index(index);

        assert!(resolver.validate(&Namespace::new("Vacme")).await.unwrap());
        assert!(matches!(
            resolver.validate(&Namespace::new("Vnope")).await,
            Err(StorageError::NamespaceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_all_tenants_skips_foreign_namespaces() {
        let index = Arc::new(NamespaceIndex::new(Arc::new(MemoryDatastore::new())));
        index.keep(&Namespace::default());
        index.keep(&Namespace::new("Vacme"));
        index.keep(&Namespace::new("Eowner-at-example.com"));
        index.keep(&Namespace::new("Xunknown"));

        let resolver =
            NamespaceResolver::multitenant(NamespaceConverter::tagged()).with_index(index);
        let tenants = resolver.all_tenants().await.unwrap();

        assert_eq!(
            tenants,
            vec![TenantId::email("owner@example.com"), TenantId::value("acme")]
        );
    }
}

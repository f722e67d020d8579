use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

// ============================================================================
// Tenant Identity
// ============================================================================

/// Logical identity of an isolated data owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TenantId {
    /// An internet domain, e.g. `example.com`.
    Domain(String),
    /// An email address, e.g. `owner@example.com`.
    Email(String),
    /// Any other opaque value.
    Value(String),
}

impl TenantId {
    pub fn domain(value: impl Into<String>) -> Self {
        TenantId::Domain(value.into())
    }

    pub fn email(value: impl Into<String>) -> Self {
        TenantId::Email(value.into())
    }

    pub fn value(value: impl Into<String>) -> Self {
        TenantId::Value(value.into())
    }

    pub fn raw_value(&self) -> &str {
        match self {
            TenantId::Domain(v) | TenantId::Email(v) | TenantId::Value(v) => v,
        }
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantId::Domain(v) => write!(f, "domain:{v}"),
            TenantId::Email(v) => write!(f, "email:{v}"),
            TenantId::Value(v) => write!(f, "value:{v}"),
        }
    }
}

// ============================================================================
// Ambient Tenant Context
// ============================================================================
//
// Multitenant storages read the tenant of the current task at call time.
// The tenant is bound for the duration of a future with `TenantContext::scope`.
//
// ============================================================================

tokio::task_local! {
    static CURRENT_TENANT: TenantId;
}

pub struct TenantContext;

impl TenantContext {
    /// Runs `future` with `tenant` as the current tenant.
    pub async fn scope<F>(tenant: TenantId, future: F) -> F::Output
    where
        F: Future,
    {
        CURRENT_TENANT.scope(tenant, future).await
    }

    /// Tenant bound to the current task, if any.
    pub fn current() -> Option<TenantId> {
        CURRENT_TENANT.try_with(|tenant| tenant.clone()).ok()
    }
}

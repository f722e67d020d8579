// ============================================================================
// Multitenancy - tenant identity and namespace resolution
// ============================================================================

pub mod converter;
pub mod index;
pub mod name;
pub mod resolver;
pub mod tenant;

pub use converter::NamespaceConverter;
pub use index::NamespaceIndex;
pub use name::{Namespace, AT_SYMBOL_REPLACEMENT};
pub use resolver::NamespaceResolver;
pub use tenant::{TenantContext, TenantId};

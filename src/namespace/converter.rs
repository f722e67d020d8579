use std::fmt;
use std::sync::Arc;

use super::name::AT_SYMBOL_REPLACEMENT;
use super::tenant::TenantId;
use crate::error::{Result, StorageError};

// ============================================================================
// Namespace Converters
// ============================================================================
//
// A converter is a pair of functions turning a tenant into a namespace string
// and back. The built-in converter tags the string with a one-character type
// prefix so decoding knows which kind of tenant to rebuild:
//
//   Domain("example.com")   -> "Dexample.com"
//   Email("a@example.com")  -> "Ea@example.com"
//   Value("acme")           -> "Vacme"
//
// `prefixed` wraps any converter and puts a caller-chosen prefix plus
// `PREFIX_DELIMITER` in front, so namespaces of this deployment can live next
// to pre-existing ones.
//
// ============================================================================

pub const DOMAIN_PREFIX: char = 'D';
pub const EMAIL_PREFIX: char = 'E';
pub const VALUE_PREFIX: char = 'V';
pub const PREFIX_DELIMITER: char = '.';

type EncodeFn = Arc<dyn Fn(&TenantId) -> Result<String> + Send + Sync>;
type DecodeFn = Arc<dyn Fn(&str) -> Result<TenantId> + Send + Sync>;

#[derive(Clone)]
pub struct NamespaceConverter {
    prefix: Option<String>,
    encode: EncodeFn,
    decode: DecodeFn,
}

impl NamespaceConverter {
    /// Builds a converter from a custom pair of functions.
    pub fn new<E, D>(encode: E, decode: D) -> Self
    where
        E: Fn(&TenantId) -> Result<String> + Send + Sync + 'static,
        D: Fn(&str) -> Result<TenantId> + Send + Sync + 'static,
    {
        Self {
            prefix: None,
            encode: Arc::new(encode),
            decode: Arc::new(decode),
        }
    }

    /// The built-in converter tagging each namespace with the tenant type.
    pub fn tagged() -> Self {
        Self::new(encode_tagged, decode_tagged)
    }

    /// Wraps this converter, putting `prefix` and a delimiter in front.
    pub fn prefixed(self, prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() || prefix.contains('@') || prefix.contains(AT_SYMBOL_REPLACEMENT) {
            return Err(StorageError::Configuration(format!(
                "invalid namespace prefix {prefix:?}"
            )));
        }

        let head = format!("{prefix}{PREFIX_DELIMITER}");
        let full_prefix = match &self.prefix {
            Some(inner) => format!("{head}{inner}"),
            None => prefix,
        };

        let inner_encode = self.encode;
        let inner_decode = self.decode;
        let encode_head = head.clone();

        Ok(Self {
            prefix: Some(full_prefix),
            encode: Arc::new(move |tenant| Ok(format!("{encode_head}{}", inner_encode(tenant)?))),
            decode: Arc::new(move |namespace| {
                let rest = namespace.strip_prefix(head.as_str()).ok_or_else(|| {
                    StorageError::Configuration(format!(
                        "namespace {namespace:?} does not start with prefix {head:?}"
                    ))
                })?;
                inner_decode(rest)
            }),
        })
    }

    /// Full prefix this converter adds, outermost first.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn encode(&self, tenant: &TenantId) -> Result<String> {
        (self.encode)(tenant)
    }

    pub fn decode(&self, namespace: &str) -> Result<TenantId> {
        (self.decode)(namespace)
    }
}

impl Default for NamespaceConverter {
    fn default() -> Self {
        Self::tagged()
    }
}

impl fmt::Debug for NamespaceConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespaceConverter")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

fn encode_tagged(tenant: &TenantId) -> Result<String> {
    let tag = match tenant {
        TenantId::Domain(_) => DOMAIN_PREFIX,
        TenantId::Email(_) => EMAIL_PREFIX,
        TenantId::Value(_) => VALUE_PREFIX,
    };
    let value = tenant.raw_value();
    if value.contains(AT_SYMBOL_REPLACEMENT) {
        return Err(StorageError::Configuration(format!(
            "tenant value {value:?} contains the reserved sequence {AT_SYMBOL_REPLACEMENT:?}"
        )));
    }
    Ok(format!("{tag}{value}"))
}

fn decode_tagged(namespace: &str) -> Result<TenantId> {
    let mut chars = namespace.chars();
    let tag = chars.next();
    let value = chars.as_str().to_string();
    match tag {
        Some(DOMAIN_PREFIX) => Ok(TenantId::Domain(value)),
        Some(EMAIL_PREFIX) => Ok(TenantId::Email(value)),
        Some(VALUE_PREFIX) => Ok(TenantId::Value(value)),
        _ => Err(StorageError::Configuration(format!(
            "namespace {namespace:?} has no known tenant type prefix"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_encoding() {
        let converter = NamespaceConverter::tagged();
        assert_eq!(converter.encode(&TenantId::domain("example.com")).unwrap(), "Dexample.com");
        assert_eq!(converter.encode(&TenantId::email("a@b.com")).unwrap(), "Ea@b.com");
        assert_eq!(converter.encode(&TenantId::value("acme")).unwrap(), "Vacme");
    }

    #[test]
    fn test_tagged_decoding_dispatches_on_prefix() {
        let converter = NamespaceConverter::tagged();
        assert_eq!(converter.decode("Dexample.com").unwrap(), TenantId::domain("example.com"));
        assert_eq!(converter.decode("Ea@b.com").unwrap(), TenantId::email("a@b.com"));
        assert_eq!(converter.decode("V").unwrap(), TenantId::value(""));
    }

    #[test]
    fn test_unknown_prefix_is_rejected() {
        let converter = NamespaceConverter::tagged();
        assert!(matches!(converter.decode("Xfoo"), Err(StorageError::Configuration(_))));
        assert!(matches!(converter.decode(""), Err(StorageError::Configuration(_))));
    }

    #[test]
    fn test_prefixed_converter_wraps_inner() {
        let converter = NamespaceConverter::tagged().prefixed("billing").unwrap();
        let tenant = TenantId::domain("example.com");

        let encoded = converter.encode(&tenant).unwrap();
        assert_eq!(encoded, "billing.Dexample.com");
        assert_eq!(converter.decode(&encoded).unwrap(), tenant);
        assert_eq!(converter.prefix(), Some("billing"));
    }

    #[test]
    fn test_prefixes_compose_outermost_first() {
        let converter = NamespaceConverter::tagged()
            .prefixed("inner")
            .unwrap()
            .prefixed("outer")
            .unwrap();
        let tenant = TenantId::value("acme");

        let encoded = converter.encode(&tenant).unwrap();
        assert_eq!(encoded, "outer.inner.Vacme");
        assert_eq!(converter.decode(&encoded).unwrap(), tenant);
        assert_eq!(converter.prefix(), Some("outer.inner"));
    }

    #[test]
    fn test_foreign_namespace_is_rejected_by_prefixed_converter() {
        let converter = NamespaceConverter::tagged().prefixed("billing").unwrap();
        assert!(converter.decode("Vacme").is_err());
    }

    #[test]
    fn test_invalid_prefix() {
        assert!(NamespaceConverter::tagged().prefixed("").is_err());
        assert!(NamespaceConverter::tagged().prefixed("a@b").is_err());
    }

    #[test]
    fn test_custom_converter() {
        let converter = NamespaceConverter::new(
            |tenant| Ok(tenant.raw_value().to_uppercase()),
            |namespace| Ok(TenantId::value(namespace.to_lowercase())),
        );
        assert_eq!(converter.encode(&TenantId::value("acme")).unwrap(), "ACME");
        assert_eq!(converter.decode("ACME").unwrap(), TenantId::value("acme"));
    }
}

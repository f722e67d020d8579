use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, StorageError};

// ============================================================================
// Namespace - physical partition name of a tenant
// ============================================================================
//
// Namespaces forbid `@`, so every computed name has it rewritten to a fixed
// replacement. A computed name whose escaped form does not unescape back to
// itself is rejected: `foo-at-bar` and `john-at@example.com` both read back
// as something else, and would share a namespace with another tenant.
//
// ============================================================================

pub const AT_SYMBOL: char = '@';
pub const AT_SYMBOL_REPLACEMENT: &str = "-at-";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    /// Wraps a name already stored in the datastore, without escaping.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The default (unnamed) namespace.
    pub fn default_namespace() -> Self {
        Self(String::new())
    }

    /// Builds a namespace from a converter's output, escaping `@`.
    pub fn from_encoded(encoded: &str) -> Result<Self> {
        let escaped = escape(encoded);
        if unescape(&escaped) != encoded {
            return Err(StorageError::Configuration(format!(
                "encoded namespace {encoded:?} is ambiguous with the reserved sequence {AT_SYMBOL_REPLACEMENT:?}"
            )));
        }
        Ok(Self(escaped))
    }

    /// Reverses the escaping applied by [`Namespace::from_encoded`].
    pub fn to_encoded(&self) -> String {
        unescape(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn escape(value: &str) -> String {
    value.replace(AT_SYMBOL, AT_SYMBOL_REPLACEMENT)
}

pub fn unescape(value: &str) -> String {
    value.replace(AT_SYMBOL_REPLACEMENT, "@")
}

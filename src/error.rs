use std::fmt;

use crate::column::ValueType;
use crate::query::Operator;

// ============================================================================
// Storage Errors
// ============================================================================
//
// "Not found" is never an error here: reads return Option. Everything in
// this enum is a genuine fault that propagates to the caller unchanged,
// with no retry at this layer.
//
// ============================================================================

pub type Result<T> = std::result::Result<T, StorageError>;

/// Kind of operation a transactional failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Write,
    Commit,
    Rollback,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Read => "ReadOperation",
            OperationKind::Write => "WriteOperation",
            OperationKind::Commit => "CommitOperation",
            OperationKind::Rollback => "RollbackOperation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No column mapping registered for type {0}")]
    UnmappedColumnType(ValueType),

    #[error("Comparison operator {0:?} has no native filter equivalent")]
    UnsupportedOperator(Operator),

    #[error("Conjunctive filter group must contain at least one parameter")]
    EmptyConjunction,

    #[error("Namespace not found in the datastore: {0:?}")]
    NamespaceNotFound(String),

    #[error("{operation} failed: {source}")]
    Transaction {
        operation: OperationKind,
        #[source]
        source: Box<StorageError>,
    },

    #[error("A transaction is already active on this handle")]
    TransactionAlreadyActive,

    #[error("No active transaction on this handle")]
    NoActiveTransaction,

    #[error("Transaction is already committed or rolled back")]
    TransactionFinished,

    #[error("Storage is closed")]
    Closed,

    #[error("Datastore call failed ({context}): {message}")]
    Backend { context: String, message: String },

    #[error("Datastore call exceeds the per-call limit of {limit} items (requested {requested})")]
    BatchLimitExceeded { limit: usize, requested: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

impl StorageError {
    pub fn backend(context: impl Into<String>, message: impl Into<String>) -> Self {
        StorageError::Backend {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Wraps `self` as the cause of a failed transactional operation.
    pub fn in_operation(self, operation: OperationKind) -> Self {
        StorageError::Transaction {
            operation,
            source: Box::new(self),
        }
    }

    /// Attaches the failing target (id, kind, query) to a backend failure.
    pub fn with_context(self, context: impl fmt::Display) -> Self {
        match self {
            StorageError::Backend { context: inner, message } => StorageError::Backend {
                context: format!("{context}; {inner}"),
                message,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_kind_names() {
        assert_eq!(OperationKind::Read.to_string(), "ReadOperation");
        assert_eq!(OperationKind::Write.to_string(), "WriteOperation");
    }

    #[test]
    fn test_transaction_error_names_operation() {
        let err = StorageError::backend("put", "unavailable").in_operation(OperationKind::Write);
        let message = err.to_string();
        assert!(message.starts_with("WriteOperation failed"));
        assert!(message.contains("unavailable"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_context_is_prepended_to_backend_errors() {
        let err = StorageError::backend("lookup", "timeout").with_context("kind=Task id=a1");
        match err {
            StorageError::Backend { context, .. } => {
                assert_eq!(context, "kind=Task id=a1; lookup");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

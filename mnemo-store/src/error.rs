use thiserror::Error;

use crate::binding::BindingError;

/// Errors surfaced by the store. Backend failures are always wrapped with the
/// operation context (table, key) rather than passed through opaquely.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table '{table}' does not exist")]
    TableNotFound { table: String },
    #[error("constraint violated on '{table}': {reason}")]
    Constraint { table: String, reason: String },
    #[error("message '{message_id}' references unknown thread '{thread_id}'")]
    Referential {
        message_id: String,
        thread_id: String,
    },
    #[error("schema conflict on '{table}': {reason}")]
    Schema { table: String, reason: String },
    #[error("thread '{0}' not found")]
    ThreadNotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("{operation} on '{table}' failed: {source}")]
    Binding {
        operation: &'static str,
        table: String,
        #[source]
        source: BindingError,
    },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    /// Wraps a binding failure, promoting constraint violations to their
    /// typed variant so callers never have to inspect backend messages.
    pub(crate) fn from_binding(
        operation: &'static str,
        table: &str,
        source: BindingError,
    ) -> Self {
        match source {
            BindingError::UniqueViolation(reason) | BindingError::NotNullViolation(reason) => {
                StoreError::Constraint {
                    table: table.to_string(),
                    reason,
                }
            }
            source => StoreError::Binding {
                operation,
                table: table.to_string(),
                source,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

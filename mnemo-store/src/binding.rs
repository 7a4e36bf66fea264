//! The seam between the store and the external SQL-executing collaborator.
//!
//! A [`SqlBinding`] executes single parameterized statements and atomic
//! batches; everything above it is backend-agnostic. Concrete bindings live
//! in their own crates (see `mnemo-store-sqlite`).

use std::collections::HashMap;
use std::error::Error as StdError;

use async_trait::async_trait;
use thiserror::Error;

/// Primitive value crossing the binding boundary, in either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

/// One parameterized statement, ready for execution.
#[derive(Debug, Clone)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl SqlStatement {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// A result row keyed by column name.
pub type SqlRow = HashMap<String, SqlValue>;

/// Outcome of a single statement execution.
#[derive(Debug, Default)]
pub struct ExecResult {
    pub rows: Vec<SqlRow>,
    pub rows_affected: u64,
}

/// Failures reported by a binding. Constraint violations are classified here
/// so the engine never sniffs backend error strings.
#[derive(Debug, Error)]
pub enum BindingError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("not-null constraint violated: {0}")]
    NotNullViolation(String),
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn StdError + Send + Sync>),
}

/// Minimal SQL execution surface the engine is built on.
///
/// `execute_batch` must be atomic: either every statement commits or none do.
#[async_trait]
pub trait SqlBinding: Send + Sync {
    async fn execute(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> std::result::Result<ExecResult, BindingError>;

    async fn execute_batch(
        &self,
        statements: &[SqlStatement],
    ) -> std::result::Result<Vec<ExecResult>, BindingError>;

    /// Live column metadata for `table`, or an empty list if the table does
    /// not exist.
    async fn column_names(&self, table: &str)
        -> std::result::Result<Vec<String>, BindingError>;
}

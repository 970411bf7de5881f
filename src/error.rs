//! Structured failures raised by the reconciliation engine.
//!
//! Every variant names the column, key, or method that caused it so callers
//! can surface the problem and re-run with corrected configuration. Per-cell
//! coercion failures are never reported here; they become Missing cells.

use thiserror::Error;

use crate::table::ColumnType;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("row count mismatch: left table has {left} row(s), right table has {right}")]
    SchemaMismatch { left: usize, right: usize },
    #[error("no join key supplied and the tables share no column names")]
    NoCommonKey,
    #[error("key column '{column}' not found in {table} table")]
    KeyNotFound { column: String, table: String },
    #[error("column '{0}' not found")]
    ColumnNotFound(String),
    #[error("output field name '{0}' is produced more than once")]
    DuplicateFieldName(String),
    #[error("column '{0}' already exists")]
    DuplicateColumnName(String),
    #[error("{method} cannot be applied to column '{column}' of type {column_type}")]
    TypeError {
        column: String,
        method: String,
        column_type: ColumnType,
    },
    #[error("invalid filter expression '{expression}': {message}")]
    InvalidExpression { expression: String, message: String },
}

impl ReconcileError {
    pub(crate) fn key_not_found(column: &str, table: &str) -> Self {
        ReconcileError::KeyNotFound {
            column: column.to_string(),
            table: table.to_string(),
        }
    }

    pub(crate) fn type_error(column: &str, method: impl Into<String>, column_type: ColumnType) -> Self {
        ReconcileError::TypeError {
            column: column.to_string(),
            method: method.into(),
            column_type,
        }
    }
}

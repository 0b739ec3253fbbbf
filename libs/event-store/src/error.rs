//! Error types for the hot store

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by schema creation, the persist transaction, and the
/// dead-letter writer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database operation failed (connection, query execution, transaction)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

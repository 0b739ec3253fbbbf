//! Error types for the ingestion idempotency registry

use thiserror::Error;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur while registering or unregistering an ingestion
/// attempt. Classification of duplicate vs conflict is NOT an error; it is
/// part of [`RegisterOutcome`](crate::RegisterOutcome).
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Database operation failed (connection, query execution, etc.)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl RegistryError {
    /// Check if the error is transient (pool exhausted / closed), in which
    /// case the caller may surface a retryable status.
    pub fn is_transient(&self) -> bool {
        match self {
            RegistryError::Database(sqlx_err) => matches!(
                sqlx_err,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
        }
    }
}

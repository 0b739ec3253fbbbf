//! Error types for the event processor

use thiserror::Error;

/// Result type for processor operations
pub type Result<T> = std::result::Result<T, AppError>;

/// Failures that stop the consumer loop (per-message failures never do;
/// they terminate in the pipeline's own state machine).
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Store error: {0}")]
    Store(#[from] event_store::StoreError),
}

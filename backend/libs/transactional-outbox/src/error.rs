//! Error types for the transactional outbox library.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for outbox operations.
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Errors that can occur during outbox operations.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Underlying storage failed
    #[error("store error: {0}")]
    Store(String),

    /// Row not found where one was expected
    #[error("outbox entry not found: {0}")]
    EntryNotFound(Uuid),

    /// The event bus rejected the entry
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

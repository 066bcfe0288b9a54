//! Error types for the postie-store crate.

use thiserror::Error;

use crate::TaskId;

/// Convenience alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by a [`TaskStore`](crate::TaskStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record does not exist.
    #[error("Task record not found: {0}")]
    NotFound(TaskId),

    /// The backend refused the write because it is full.
    #[error("Task store capacity exceeded ({capacity} records)")]
    CapacityExceeded { capacity: usize },

    /// The task data could not be serialised for storage.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific failure (connection loss, constraint violation, ...).
    #[error("Backend error: {0}")]
    Backend(String),
}

//! Error types for the durable store contract

use thiserror::Error;

/// Result type for durable store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by a durable store implementation
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying database rejected the operation
    #[error("Database error: {0}")]
    Database(String),

    /// A stored row could not be mapped back into a model type
    #[error("Invalid stored row: {0}")]
    InvalidRow(String),

    /// The store is not reachable at the moment
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Internal error (worker task failed, lock poisoned, ...)
    #[error("Internal error: {0}")]
    Internal(String),
}

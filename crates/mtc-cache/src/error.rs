//! Cache and filter error types

use mtc_core::StoreError;
use thiserror::Error;

/// Errors while loading trigger rules
#[derive(Debug, Error)]
pub enum FilterError {
    /// Rule document is not valid YAML or has the wrong shape
    #[error("Invalid trigger document: {0}")]
    InvalidDocument(String),

    /// A trigger has neither a filter nor nested triggers
    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    /// IO error reading rule files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from a backup cycle
#[derive(Debug, Error)]
pub enum CacheError {
    /// The durable store rejected a write; the cycle is retried later
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

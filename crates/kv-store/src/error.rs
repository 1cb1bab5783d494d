//! Error types for the key-value store

use thiserror::Error;

/// Errors that can occur while talking to the store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Operation exceeded its deadline
    #[error("Store operation timed out: {0}")]
    Timeout(&'static str),

    /// Lease does not exist (never granted, revoked, or expired)
    #[error("Lease not found: {0}")]
    LeaseNotFound(i64),

    /// IO error (snapshot persistence)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

//! Error types for the presence core

use thiserror::Error;

/// Errors raised by the registry, lease manager and people registry
#[derive(Error, Debug)]
pub enum PresenceError {
    /// Store call failed or timed out
    #[error("Store error: {0}")]
    Store(#[from] kv_store::StoreError),

    /// A stored record could not be decoded; the record is left untouched
    #[error("Malformed record at {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A record could not be encoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A collaborator call failed
    #[error("Collaborator error: {0}")]
    Collaborator(#[from] ServiceError),

    /// Invalid request
    #[error("Invalid request: {0}")]
    Invalid(String),
}

/// Errors returned by external collaborators
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Remote service throttled the call (HTTP 429)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Call did not complete within its deadline
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Transport-level failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The service answered but refused the request
    #[error("Rejected: {0}")]
    Rejected(String),
}

//! Error types for the automation engine

use thiserror::Error;

/// Errors that can occur in the automation engine
#[derive(Error, Debug)]
pub enum AutomationError {
    /// Registry, lease or decode failure
    #[error(transparent)]
    Presence(#[from] presence_core::PresenceError),

    /// Store call failed or timed out
    #[error("Store error: {0}")]
    Store(#[from] kv_store::StoreError),

    /// Timed command or device not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// An assistant or notifier call failed
    #[error("Action failed: {0}")]
    Action(#[from] presence_core::ServiceError),

    /// Invalid cron expression
    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// IO error (seed files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

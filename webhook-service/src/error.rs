//! Error types for the webhook service

use thiserror::Error;

/// Result type for webhook-service operations
pub type Result<T> = std::result::Result<T, Error>;

/// Webhook service errors
#[derive(Error, Debug)]
pub enum Error {
    /// Notification payload could not be decoded
    #[error("Malformed notification: {0}")]
    Malformed(String),

    /// Job queue has shut down
    #[error("Job queue closed")]
    QueueClosed,

    /// Lane is at capacity
    #[error("Job queue full")]
    QueueFull,

    /// Job exceeded its execution timeout
    #[error("Job timed out after {0} seconds")]
    JobTimeout(u64),

    /// Engine error
    #[error(transparent)]
    Engine(#[from] billing_engine::Error),

    /// Storage error
    #[error(transparent)]
    Core(#[from] billing_core::Error),
}

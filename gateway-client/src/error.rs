//! Error types for the gateway client
//!
//! Gateway *call* outcomes are not errors — they classify into
//! [`crate::GatewayOutcome`]. This enum covers local failures only:
//! building the HTTP client, rendering a request document.

use thiserror::Error;

/// Result type for gateway-client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway client errors
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP client construction failed
    #[error("HTTP client error: {0}")]
    Client(String),

    /// Request document could not be rendered
    #[error("Request serialization error: {0}")]
    RequestSerialization(String),

    /// Amount cannot be represented in integer minor units
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

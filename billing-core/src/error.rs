//! Error types for the billing core

use thiserror::Error;

/// Result type for billing-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Billing core errors
#[derive(Error, Debug)]
pub enum Error {
    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(crate::types::AccountId),

    /// Billing profile not found
    #[error("Billing profile not found: {0}")]
    ProfileNotFound(crate::types::ProfileId),

    /// Billing attempt not found
    #[error("Billing attempt not found: {0}")]
    AttemptNotFound(crate::types::AttemptId),

    /// Webhook event not found
    #[error("Webhook event not found: {0}")]
    EventNotFound(uuid::Uuid),

    /// An IBAN may belong to at most one active non-legacy model
    #[error("IBAN already enrolled in active {existing} model, cannot create {requested} profile")]
    ModelConflict {
        /// Model of the existing active profile
        existing: crate::types::BillingModel,
        /// Model requested for the new profile
        requested: crate::types::BillingModel,
    },

    /// Transaction ids are globally unique
    #[error("Duplicate transaction id: {0}")]
    DuplicateTransactionId(String),

    /// At most one attempt per account may be pending
    #[error("Account {0} already has a pending attempt")]
    PendingAttemptExists(crate::types::AccountId),

    /// Attempt already in a terminal state that forbids the transition
    #[error("Invalid attempt transition: {from} → {to}")]
    InvalidTransition {
        /// Current status
        from: crate::types::AttemptStatus,
        /// Requested status
        to: crate::types::AttemptStatus,
    },

    /// Invalid configuration (fatal at startup, never per-request)
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

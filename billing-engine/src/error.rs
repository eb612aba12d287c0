//! Error types for the billing engine

use thiserror::Error;

/// Result type for billing-engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Billing engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Eligibility rejected the account; nothing was sent to the gateway
    #[error("Not eligible: {0}")]
    NotEligible(crate::eligibility::RejectReason),

    /// Retry requested for an attempt not in a retryable state
    #[error("Attempt {id} not retryable from status {status}")]
    NotRetryable {
        /// Source attempt
        id: billing_core::types::AttemptId,
        /// Its current status
        status: billing_core::types::AttemptStatus,
    },

    /// Reconciliation needs the gateway-assigned id, which was never set
    #[error("Attempt {0} has no gateway unique id")]
    MissingUniqueId(billing_core::types::AttemptId),

    /// Request document could not be rendered
    #[error("Gateway request error: {0}")]
    Request(#[from] gateway_client::Error),

    /// Storage error
    #[error(transparent)]
    Core(#[from] billing_core::Error),
}

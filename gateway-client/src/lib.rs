//! # Gateway Client
//!
//! Client for the payment gateway's XML wire protocol:
//!
//! - Typed request builder for SEPA direct-debit submissions
//! - Schema-tolerant response normalizer (ordered map, attribute-prefixed,
//!   repeated siblings collapsed into arrays)
//! - Authenticated HTTP transport with split connect/total timeouts
//! - Outcome classification: every call resolves to exactly one of
//!   success, gateway error, HTTP error, network error or parse error —
//!   nothing escapes this boundary as a panic or untyped error
//! - Notification signature verification (`sha1(unique_id + secret)`,
//!   constant-time compare)
//!
//! # Example
//!
//! ```no_run
//! use gateway_client::{DebitRequest, GatewayApi, GatewayClient, GatewayOutcome};
//! use billing_core::config::GatewayConfig;
//!
//! # async fn run(request: DebitRequest) -> anyhow::Result<()> {
//! let config = GatewayConfig::default();
//! let client = GatewayClient::new(&config)?;
//! match client.submit_debit(&request).await {
//!     GatewayOutcome::Success(response) => {
//!         println!("unique_id = {:?}", response.unique_id());
//!     }
//!     other => eprintln!("submission failed: {}", other.label()),
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod client;
pub mod error;
pub mod metrics;
pub mod mock;
pub mod outcome;
pub mod request;
pub mod response;
pub mod signature;

pub use client::GatewayClient;
pub use error::{Error, Result};
pub use mock::MockGateway;
pub use outcome::{GatewayApi, GatewayOutcome};
pub use request::DebitRequest;
pub use response::{record_field, GatewayResponse};
pub use signature::verify_signature;

/// Bytes of a malformed response body retained for diagnostics
pub const PARSE_SNIPPET_BYTES: usize = 1000;

/// SEPA-safe name field length limit
pub const SEPA_NAME_MAX_CHARS: usize = 35;

//! # Billing Core
//!
//! Shared domain model for the direct-debit billing engine:
//!
//! - Accounts (debtors), billing profiles, billing attempts
//! - Webhook event records (the idempotency store)
//! - Blacklist guard
//! - Repository interfaces with in-memory implementations
//! - The single immutable engine configuration
//!
//! # State machines
//!
//! Account lifecycle:
//!
//! ```text
//! Uploaded → Pending → Billing → Recovered | Failed | Chargebacked
//!               ↑__________|          (Declined/Error return the
//!                                      account to Pending)
//! ```
//!
//! Billing attempt:
//!
//! ```text
//! Pending → Approved | Declined | Error | Voided     (terminal)
//! any terminal state → Chargebacked                   (one-way, terminal)
//! ```
//!
//! Retries are fresh attempt rows, never transitions of an existing row.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod blacklist;
pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use blacklist::{BlacklistGuard, InMemoryBlacklist};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use types::*;

/// Default lifetime charge cap for recurring models (currency units)
pub const DEFAULT_LIFETIME_CAP: u32 = 750;

/// Default outbound requests per second for batch billing
pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 50;

/// Default circuit breaker threshold (consecutive failures before pausing)
pub const DEFAULT_CB_FAILURE_THRESHOLD: u32 = 10;

/// Default circuit breaker cooldown (seconds)
pub const DEFAULT_CB_COOLDOWN_SECONDS: u64 = 300;

/// Default reconciliation page size
pub const DEFAULT_RECON_PAGE_SIZE: u32 = 100;

//! # Billing Engine
//!
//! Decides which accounts may be charged, submits charges through the
//! gateway client, and keeps local attempt state consistent with the
//! gateway's ledger.
//!
//! # Components
//!
//! 1. **Eligibility resolver**: pure, ordered short-circuit rules —
//!    the first failing rule names the rejection
//! 2. **Dispatcher**: per-account transactional billing flow, batch
//!    submission under a sliding-window rate limit and a
//!    consecutive-failure circuit breaker
//! 3. **Chargeback application**: the single shared implementation used by
//!    the webhook processor and the reconciliation sweeper
//! 4. **Reconciliation sweeper**: paginated by-date polling and
//!    stale-pending repair for lost notifications

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod chargeback;
pub mod circuit_breaker;
pub mod dispatcher;
pub mod eligibility;
pub mod error;
pub mod rate_limit;
pub mod sweeper;

pub use chargeback::{ChargebackApplication, ChargebackProcessor, ChargebackRecord};
pub use circuit_breaker::BatchCircuitBreaker;
pub use dispatcher::{account_status_for, map_outcome, BatchOutcome, Dispatcher};
pub use eligibility::{Eligibility, EligibilityView, RejectReason};
pub use error::{Error, Result};
pub use rate_limit::SlidingWindowLimiter;
pub use sweeper::{ReconcileResult, ReconciliationSweeper, SyncStats};

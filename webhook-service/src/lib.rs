//! # Webhook Service
//!
//! HTTP service around the billing engine:
//!
//! - Notification ingestion: authenticate (`sha1(unique_id + secret)`),
//!   deduplicate atomically, enqueue, acknowledge — the business effect
//!   happens asynchronously
//! - Prioritized worker pool: notifications > batch billing > sweeps, with
//!   per-job timeout, exponential-backoff retries and permanent-failure
//!   bookkeeping
//! - Axum router: `POST /webhooks/gateway` (form or JSON), `GET /health`,
//!   `GET /metrics`

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod error;
pub mod http;
pub mod ingest;
pub mod metrics;
pub mod processor;
pub mod queue;

pub use error::{Error, Result};
pub use http::{router, AppState};
pub use ingest::{IngestDecision, Notification, ProcessingType, WebhookIngestor};
pub use processor::WebhookProcessor;
pub use queue::{Job, JobKind, JobQueue, Lane, Worker};

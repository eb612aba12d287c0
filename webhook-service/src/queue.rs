//! Prioritized job queue and worker pool
//!
//! Three lanes, strict priority: notification processing preempts batch
//! billing, which preempts maintenance sweeps. A worker drains the highest
//! non-empty lane first; within a lane, jobs run in arrival order.
//!
//! Execution is supervised: each run is bounded by a hard timeout, failures
//! retry with exponential backoff, and an exhausted job is marked failed on
//! its event record instead of being silently dropped.

use crate::error::{Error, Result};
use crate::ingest::Notification;
use crate::metrics::JOBS_TOTAL;
use crate::processor::WebhookProcessor;
use billing_core::{
    config::WebhookConfig,
    store::WebhookEventRepo,
    types::{BillingModel, UploadId},
};
use billing_engine::{Dispatcher, ReconciliationSweeper};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Queue lane, in descending priority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Notification processing
    Webhooks,
    /// Batch billing runs
    Billing,
    /// Maintenance sweeps
    Default,
}

impl Lane {
    fn label(&self) -> &'static str {
        match self {
            Lane::Webhooks => "webhooks",
            Lane::Billing => "billing",
            Lane::Default => "default",
        }
    }
}

/// What a job does when a worker picks it up
#[derive(Debug, Clone)]
pub enum JobKind {
    /// Apply one gateway notification
    ProcessNotification(Notification),
    /// Bill every candidate of an upload batch
    BillUpload {
        /// Upload batch
        upload_id: UploadId,
        /// Billing model to run under
        model: BillingModel,
        /// Optional per-run amount override
        override_amount: Option<Decimal>,
    },
    /// Sweep one day of the gateway's chargeback listing
    SweepDate(NaiveDate),
    /// Re-query stale pending attempts
    SweepStalePending,
}

/// One unit of queued work
#[derive(Debug, Clone)]
pub struct Job {
    /// Event record to report completion/failure on, when one exists
    pub event_id: Option<Uuid>,
    /// The work itself
    pub kind: JobKind,
    /// When the job entered the queue
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    /// Build a job
    pub fn new(event_id: Option<Uuid>, kind: JobKind) -> Self {
        Self {
            event_id,
            kind,
            enqueued_at: Utc::now(),
        }
    }
}

/// Handle to the three prioritized lanes; cheap to clone
#[derive(Clone)]
pub struct JobQueue {
    webhooks: (async_channel::Sender<Job>, async_channel::Receiver<Job>),
    billing: (async_channel::Sender<Job>, async_channel::Receiver<Job>),
    default: (async_channel::Sender<Job>, async_channel::Receiver<Job>),
}

/// Per-lane backlog bound; hitting it means processing has fallen badly
/// behind and backpressure beats unbounded memory growth
const LANE_CAPACITY: usize = 10_000;

impl JobQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            webhooks: async_channel::bounded(LANE_CAPACITY),
            billing: async_channel::bounded(LANE_CAPACITY),
            default: async_channel::bounded(LANE_CAPACITY),
        }
    }

    /// Enqueue a job on a lane
    pub fn enqueue(&self, lane: Lane, job: Job) -> Result<()> {
        let sender = match lane {
            Lane::Webhooks => &self.webhooks.0,
            Lane::Billing => &self.billing.0,
            Lane::Default => &self.default.0,
        };
        sender.try_send(job).map_err(|err| match err {
            async_channel::TrySendError::Full(_) => Error::QueueFull,
            async_channel::TrySendError::Closed(_) => Error::QueueClosed,
        })
    }

    /// Take the next job, highest non-empty lane first
    ///
    /// Returns `None` once the queue has been closed and drained.
    pub async fn recv(&self) -> Option<Job> {
        loop {
            // Drain by priority before waiting
            if let Ok(job) = self.webhooks.1.try_recv() {
                return Some(job);
            }
            if let Ok(job) = self.billing.1.try_recv() {
                return Some(job);
            }
            if let Ok(job) = self.default.1.try_recv() {
                return Some(job);
            }
            if self.is_closed() {
                return None;
            }

            tokio::select! {
                biased;
                job = self.webhooks.1.recv() => if let Ok(job) = job { return Some(job) },
                job = self.billing.1.recv() => if let Ok(job) = job { return Some(job) },
                job = self.default.1.recv() => if let Ok(job) = job { return Some(job) },
            }
        }
    }

    /// Jobs currently queued across all lanes
    pub fn len(&self) -> usize {
        self.webhooks.1.len() + self.billing.1.len() + self.default.1.len()
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close all lanes; workers exit after draining
    pub fn close(&self) {
        self.webhooks.0.close();
        self.billing.0.close();
        self.default.0.close();
    }

    fn is_closed(&self) -> bool {
        self.webhooks.0.is_closed() && self.billing.0.is_closed() && self.default.0.is_closed()
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Executes queued jobs under timeout and retry supervision
pub struct Worker {
    id: usize,
    config: WebhookConfig,
    queue: JobQueue,
    processor: Arc<WebhookProcessor>,
    dispatcher: Option<Arc<Dispatcher>>,
    sweeper: Option<Arc<ReconciliationSweeper>>,
    events: Arc<dyn WebhookEventRepo>,
}

impl Worker {
    /// Wire up a worker
    pub fn new(
        id: usize,
        config: WebhookConfig,
        queue: JobQueue,
        processor: Arc<WebhookProcessor>,
        dispatcher: Option<Arc<Dispatcher>>,
        sweeper: Option<Arc<ReconciliationSweeper>>,
        events: Arc<dyn WebhookEventRepo>,
    ) -> Self {
        Self {
            id,
            config,
            queue,
            processor,
            dispatcher,
            sweeper,
            events,
        }
    }

    /// Run until the queue closes
    pub async fn run(self) {
        info!(worker = self.id, "Worker started");
        while let Some(job) = self.queue.recv().await {
            self.execute(job).await;
        }
        info!(worker = self.id, "Worker stopped");
    }

    /// Run one job to completion, retrying transient failures
    #[instrument(skip(self, job), fields(worker = self.id))]
    pub async fn execute(&self, job: Job) {
        let lane = lane_of(&job.kind);
        let waited = (Utc::now() - job.enqueued_at).num_milliseconds().max(0) as f64 / 1000.0;
        crate::metrics::JOB_QUEUE_WAIT.observe(waited);
        let timeout = Duration::from_secs(self.config.job_timeout_secs);
        let mut last_error = String::new();

        for run in 0..=self.config.max_job_retries {
            if run > 0 {
                let delay = self.config.retry_base_delay_secs * 2u64.pow(run - 1);
                warn!(run, delay_secs = delay, error = %last_error, "Retrying job");
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }

            let result = match tokio::time::timeout(timeout, self.run_job(&job)).await {
                Ok(result) => result,
                Err(_) => Err(Error::JobTimeout(self.config.job_timeout_secs)),
            };

            match result {
                Ok(message) => {
                    if let Some(event_id) = job.event_id {
                        if let Err(err) =
                            self.events.mark_completed(event_id, Some(message)).await
                        {
                            error!(%event_id, error = %err, "Failed to mark event completed");
                        }
                    }
                    JOBS_TOTAL.with_label_values(&[lane.label(), "completed"]).inc();
                    return;
                }
                Err(err) => last_error = err.to_string(),
            }
        }

        error!(
            retries = self.config.max_job_retries,
            error = %last_error,
            "Job permanently failed"
        );
        JOBS_TOTAL.with_label_values(&[lane.label(), "failed"]).inc();
        if let Some(event_id) = job.event_id {
            if let Err(err) = self.events.mark_failed(event_id, last_error).await {
                error!(%event_id, error = %err, "Failed to mark event failed");
            }
        }
    }

    async fn run_job(&self, job: &Job) -> Result<String> {
        match &job.kind {
            JobKind::ProcessNotification(notification) => {
                self.processor.process(notification).await
            }
            JobKind::BillUpload {
                upload_id,
                model,
                override_amount,
            } => {
                let dispatcher = self
                    .dispatcher
                    .as_ref()
                    .ok_or_else(|| Error::Malformed("no dispatcher configured".to_string()))?;
                let tally = dispatcher
                    .bill_upload(*upload_id, *model, *override_amount)
                    .await?;
                Ok(format!(
                    "upload {}: submitted={} approved={} skipped={} failed={}",
                    upload_id, tally.submitted, tally.approved, tally.skipped, tally.failed
                ))
            }
            JobKind::SweepDate(date) => {
                let sweeper = self
                    .sweeper
                    .as_ref()
                    .ok_or_else(|| Error::Malformed("no sweeper configured".to_string()))?;
                let stats = sweeper.sync_by_date(*date).await?;
                Ok(format!(
                    "sweep {}: records={} applied={} unmatched={}",
                    date, stats.records, stats.applied, stats.unmatched
                ))
            }
            JobKind::SweepStalePending => {
                let sweeper = self
                    .sweeper
                    .as_ref()
                    .ok_or_else(|| Error::Malformed("no sweeper configured".to_string()))?;
                let stats = sweeper.sync_stale_pending().await?;
                Ok(format!(
                    "stale sweep: stale={} repaired={} errors={}",
                    stats.records, stats.repaired, stats.errors
                ))
            }
        }
    }
}

fn lane_of(kind: &JobKind) -> Lane {
    match kind {
        JobKind::ProcessNotification(_) => Lane::Webhooks,
        JobKind::BillUpload { .. } => Lane::Billing,
        JobKind::SweepDate(_) | JobKind::SweepStalePending => Lane::Default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(kind: JobKind) -> Job {
        Job::new(None, kind)
    }

    #[tokio::test]
    async fn test_priority_order_across_lanes() {
        let queue = JobQueue::new();
        let date = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        queue.enqueue(Lane::Default, job(JobKind::SweepDate(date))).unwrap();
        queue
            .enqueue(
                Lane::Billing,
                job(JobKind::BillUpload {
                    upload_id: UploadId::new(),
                    model: BillingModel::Legacy,
                    override_amount: None,
                }),
            )
            .unwrap();
        queue.enqueue(Lane::Webhooks, job(JobKind::SweepStalePending)).unwrap();

        // Enqueued default-first, drained webhooks-first
        assert!(matches!(
            queue.recv().await.unwrap().kind,
            JobKind::SweepStalePending
        ));
        assert!(matches!(
            queue.recv().await.unwrap().kind,
            JobKind::BillUpload { .. }
        ));
        assert!(matches!(queue.recv().await.unwrap().kind, JobKind::SweepDate(_)));
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_and_drains() {
        let queue = JobQueue::new();
        let date = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        queue.enqueue(Lane::Default, job(JobKind::SweepDate(date))).unwrap();
        queue.close();

        assert!(queue.enqueue(Lane::Default, job(JobKind::SweepStalePending)).is_err());
        // Already-queued work still drains
        assert!(queue.recv().await.is_some());
        assert!(queue.recv().await.is_none());
    }
}

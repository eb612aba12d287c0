//! Webhook service metrics

use prometheus::{register_counter_vec, register_histogram, CounterVec, Histogram};

lazy_static::lazy_static! {
    /// Notifications received, by ingestion result
    pub static ref WEBHOOKS_RECEIVED_TOTAL: CounterVec = register_counter_vec!(
        "webhooks_received_total",
        "Total webhook notifications received",
        &["result"]
    )
    .unwrap();

    /// Jobs executed, by lane and terminal result
    pub static ref JOBS_TOTAL: CounterVec = register_counter_vec!(
        "jobs_total",
        "Total jobs executed",
        &["lane", "result"]
    )
    .unwrap();

    /// Seconds a job spent queued before a worker picked it up
    pub static ref JOB_QUEUE_WAIT: Histogram = register_histogram!(
        "job_queue_wait_seconds",
        "Time jobs spent waiting in the queue"
    )
    .unwrap();
}

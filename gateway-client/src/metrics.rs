//! Gateway client metrics

use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec,
};

lazy_static::lazy_static! {
    /// Gateway calls by operation and classified outcome
    pub static ref GATEWAY_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "gateway_requests_total",
        "Total gateway requests",
        &["operation", "outcome"]
    )
    .unwrap();

    /// Gateway call duration by operation
    pub static ref GATEWAY_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "gateway_request_duration_seconds",
        "Gateway request duration",
        &["operation"]
    )
    .unwrap();
}

//! Scriptable gateway mock for engine and service tests

use crate::{
    outcome::{GatewayApi, GatewayOutcome},
    request::DebitRequest,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// One recorded call
#[derive(Debug, Clone)]
pub enum RecordedCall {
    /// `submit_debit`
    Debit(DebitRequest),
    /// `reconcile`
    Reconcile(String),
    /// `fetch_by_date_range`
    FetchByDate {
        /// Range start
        start: NaiveDate,
        /// Range end
        end: NaiveDate,
        /// Page number
        page: u32,
    },
}

/// Scripted gateway: pops queued outcomes in order, falls back to an
/// auto-approved response, and records every call
#[derive(Debug, Default)]
pub struct MockGateway {
    scripted: Mutex<VecDeque<GatewayOutcome>>,
    calls: Mutex<Vec<RecordedCall>>,
    sequence: AtomicU64,
}

impl MockGateway {
    /// Create an empty mock
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next outcome
    pub async fn push_outcome(&self, outcome: GatewayOutcome) {
        self.scripted.lock().await.push_back(outcome);
    }

    /// Queue the same outcome n times
    pub async fn push_outcomes(&self, outcome: GatewayOutcome, n: usize) {
        let mut scripted = self.scripted.lock().await;
        for _ in 0..n {
            scripted.push_back(outcome.clone());
        }
    }

    /// Build a `Success` outcome with the given status and unique id
    pub fn response(status: &str, unique_id: &str) -> GatewayOutcome {
        GatewayOutcome::from_body(&format!(
            "<payment_response><status>{}</status><unique_id>{}</unique_id><transaction_type>sdd_sale</transaction_type></payment_response>",
            status, unique_id
        ))
    }

    /// Build a `GatewayError` outcome
    pub fn error_response(code: &str, message: &str) -> GatewayOutcome {
        GatewayOutcome::from_body(&format!(
            "<payment_response><status>error</status><code>{}</code><message>{}</message></payment_response>",
            code, message
        ))
    }

    /// Calls recorded so far
    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    /// Number of calls recorded so far
    pub fn call_count(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    async fn next_outcome(&self) -> GatewayOutcome {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        match self.scripted.lock().await.pop_front() {
            Some(outcome) => outcome,
            None => Self::response("approved", &format!("EMG-{}", n)),
        }
    }
}

#[async_trait]
impl GatewayApi for MockGateway {
    async fn submit_debit(&self, request: &DebitRequest) -> GatewayOutcome {
        self.calls
            .lock()
            .await
            .push(RecordedCall::Debit(request.clone()));
        self.next_outcome().await
    }

    async fn reconcile(&self, unique_id: &str) -> GatewayOutcome {
        self.calls
            .lock()
            .await
            .push(RecordedCall::Reconcile(unique_id.to_string()));
        self.next_outcome().await
    }

    async fn fetch_by_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        page: u32,
    ) -> GatewayOutcome {
        self.calls
            .lock()
            .await
            .push(RecordedCall::FetchByDate { start, end, page });
        self.next_outcome().await
    }
}

//! Authenticated HTTP transport to the gateway

use crate::{
    error::{Error, Result},
    metrics::{GATEWAY_REQUESTS_TOTAL, GATEWAY_REQUEST_DURATION},
    outcome::{snippet, GatewayApi, GatewayOutcome},
    request::{build_by_date, build_debit, build_reconcile, DebitRequest},
};
use async_trait::async_trait;
use billing_core::config::GatewayConfig;
use chrono::NaiveDate;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP client for the gateway wire protocol
pub struct GatewayClient {
    config: GatewayConfig,
    http: Client,
}

impl GatewayClient {
    /// Build a client with independent connect and total timeout budgets
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::Client(e.to_string()))?;

        Ok(Self {
            config: config.clone(),
            http,
        })
    }

    /// Verify a notification signature against the configured secret
    pub fn verify_signature(&self, unique_id: &str, signature: &str, secret: &str) -> bool {
        crate::signature::verify_signature(unique_id, signature, secret)
    }

    async fn post(&self, operation: &'static str, body: String) -> GatewayOutcome {
        debug!(operation, bytes = body.len(), "Posting to gateway");

        let start = std::time::Instant::now();
        let response = self
            .http
            .post(&self.config.endpoint)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(body)
            .send()
            .await;
        GATEWAY_REQUEST_DURATION
            .with_label_values(&[operation])
            .observe(start.elapsed().as_secs_f64());

        let outcome = match response {
            Err(e) => GatewayOutcome::NetworkError(e.to_string()),
            Ok(response) => {
                let status = response.status();
                match response.text().await {
                    Err(e) => GatewayOutcome::NetworkError(e.to_string()),
                    Ok(text) if !status.is_success() => GatewayOutcome::HttpError {
                        status: status.as_u16(),
                        body: snippet(&text),
                    },
                    Ok(text) => GatewayOutcome::from_body(&text),
                }
            }
        };

        GATEWAY_REQUESTS_TOTAL
            .with_label_values(&[operation, outcome.label()])
            .inc();
        if !outcome.is_success() {
            warn!(operation, outcome = %outcome, "Gateway call did not succeed");
        }

        outcome
    }

    fn render_failure(err: Error) -> GatewayOutcome {
        // A request that cannot be rendered never reaches the wire
        GatewayOutcome::ParseError {
            message: err.to_string(),
            snippet: String::new(),
        }
    }
}

#[async_trait]
impl GatewayApi for GatewayClient {
    async fn submit_debit(&self, request: &DebitRequest) -> GatewayOutcome {
        match build_debit(request) {
            Ok(body) => self.post("submit_debit", body).await,
            Err(e) => Self::render_failure(e),
        }
    }

    async fn reconcile(&self, unique_id: &str) -> GatewayOutcome {
        match build_reconcile(unique_id) {
            Ok(body) => self.post("reconcile", body).await,
            Err(e) => Self::render_failure(e),
        }
    }

    async fn fetch_by_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        page: u32,
    ) -> GatewayOutcome {
        match build_by_date(start, end, page) {
            Ok(body) => self.post("fetch_by_date_range", body).await,
            Err(e) => Self::render_failure(e),
        }
    }
}

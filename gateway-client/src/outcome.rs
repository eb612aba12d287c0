//! Gateway call outcomes and the client interface
//!
//! Every gateway interaction resolves to exactly one [`GatewayOutcome`];
//! transport, HTTP and parse failures are classified, never propagated as
//! errors past this boundary.

use crate::request::DebitRequest;
use crate::response::GatewayResponse;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Classification of one gateway call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayOutcome {
    /// 2xx with a well-formed, non-error body
    Success(GatewayResponse),

    /// 2xx with a structured error payload
    GatewayError {
        /// Gateway error code
        code: Option<String>,
        /// Human-readable message
        message: Option<String>,
        /// Technical message for diagnostics
        technical_message: Option<String>,
        /// Full normalized response
        response: GatewayResponse,
    },

    /// Non-2xx response
    HttpError {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// Transport-level failure (DNS, TLS, timeout, …)
    NetworkError(String),

    /// Malformed response body
    ParseError {
        /// What failed to parse
        message: String,
        /// First bytes of the body, retained for diagnostics
        snippet: String,
    },
}

impl GatewayOutcome {
    /// Classify a 2xx response body
    pub fn from_body(body: &str) -> Self {
        match GatewayResponse::parse(body) {
            Ok(response) => {
                let is_error = response.status().is_some_and(|s| s.eq_ignore_ascii_case("error"))
                    || (response.code().is_some() && response.status().is_none());
                if is_error {
                    GatewayOutcome::GatewayError {
                        code: response.code().map(String::from),
                        message: response.message().map(String::from),
                        technical_message: response.technical_message().map(String::from),
                        response,
                    }
                } else {
                    GatewayOutcome::Success(response)
                }
            }
            Err(message) => GatewayOutcome::ParseError {
                message,
                snippet: snippet(body),
            },
        }
    }

    /// True for `Success`
    pub fn is_success(&self) -> bool {
        matches!(self, GatewayOutcome::Success(_))
    }

    /// The normalized response, when one was parsed
    pub fn response(&self) -> Option<&GatewayResponse> {
        match self {
            GatewayOutcome::Success(response) => Some(response),
            GatewayOutcome::GatewayError { response, .. } => Some(response),
            _ => None,
        }
    }

    /// Short label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            GatewayOutcome::Success(_) => "success",
            GatewayOutcome::GatewayError { .. } => "gateway_error",
            GatewayOutcome::HttpError { .. } => "http_error",
            GatewayOutcome::NetworkError(_) => "network_error",
            GatewayOutcome::ParseError { .. } => "parse_error",
        }
    }
}

impl std::fmt::Display for GatewayOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayOutcome::Success(response) => {
                write!(f, "success (status={})", response.status().unwrap_or("-"))
            }
            GatewayOutcome::GatewayError { code, message, .. } => write!(
                f,
                "gateway error {}: {}",
                code.as_deref().unwrap_or("-"),
                message.as_deref().unwrap_or("-")
            ),
            GatewayOutcome::HttpError { status, .. } => write!(f, "http error {}", status),
            GatewayOutcome::NetworkError(err) => write!(f, "network error: {}", err),
            GatewayOutcome::ParseError { message, .. } => write!(f, "parse error: {}", message),
        }
    }
}

/// Truncate a body to the diagnostic snippet size
pub fn snippet(body: &str) -> String {
    let mut end = body.len().min(crate::PARSE_SNIPPET_BYTES);
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

/// The gateway's query/submit interface
///
/// Object-safe so services can swap the HTTP client for a scripted mock.
#[async_trait]
pub trait GatewayApi: Send + Sync {
    /// Submit a direct-debit charge
    async fn submit_debit(&self, request: &DebitRequest) -> GatewayOutcome;

    /// Query a single transaction by the gateway-assigned id
    async fn reconcile(&self, unique_id: &str) -> GatewayOutcome;

    /// Page through the gateway's chargeback listing for a date range
    async fn fetch_by_date_range(&self, start: NaiveDate, end: NaiveDate, page: u32)
        -> GatewayOutcome;
}

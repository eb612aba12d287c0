//! HTTP surface
//!
//! One webhook endpoint plus health and metrics. The gateway posts
//! notifications form-encoded; JSON is accepted as well for manual replay.
//!
//! Response semantics the gateway relies on:
//! - 200: acknowledged (fresh or duplicate) — the gateway stops retrying
//! - 400: undecodable payload
//! - 401: signature rejected

use crate::ingest::{IngestDecision, Notification, WebhookIngestor};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    /// The ingestion path
    pub ingestor: Arc<WebhookIngestor>,
}

/// Build the service router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/gateway", post(receive_notification))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn decode(headers: &HeaderMap, body: &[u8]) -> Result<Notification, String> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if content_type.starts_with("application/json") {
        serde_json::from_slice(body).map_err(|e| e.to_string())
    } else {
        serde_urlencoded::from_bytes(body).map_err(|e| e.to_string())
    }
}

async fn receive_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let notification = match decode(&headers, &body) {
        Ok(notification) => notification,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "status": "malformed", "error": err })),
            )
                .into_response();
        }
    };

    let raw = String::from_utf8_lossy(&body).into_owned();
    match state.ingestor.ingest(notification, raw).await {
        Ok(IngestDecision::Accepted { event_id, .. }) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "event_id": event_id })),
        )
            .into_response(),
        Ok(IngestDecision::Duplicate) => {
            (StatusCode::OK, Json(json!({ "status": "duplicate" }))).into_response()
        }
        Ok(IngestDecision::Ignored) => {
            (StatusCode::OK, Json(json!({ "status": "ignored" }))).into_response()
        }
        Ok(IngestDecision::InvalidSignature) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "status": "invalid_signature" })),
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "Notification ingestion failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error" })),
            )
                .into_response()
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!(error = %err, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    ([(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer).into_response()
}

//! Notification ingestion
//!
//! The synchronous half of webhook handling: authenticate, deduplicate,
//! enqueue, respond. No business effect happens on this path; a valid,
//! fresh notification is durably registered and handed to the job queue
//! before the gateway gets its 200.
//!
//! Registration is the idempotency gate. It happens-before enqueueing, so
//! a duplicate delivery racing the first one is rejected even while the
//! original job is still in flight.

use crate::error::Result;
use crate::metrics::WEBHOOKS_RECEIVED_TOTAL;
use crate::queue::{Job, JobKind, JobQueue, Lane};
use billing_core::{
    config::WebhookConfig,
    store::{Registration, WebhookEventRepo},
    types::WebhookKey,
};
use gateway_client::verify_signature;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// A gateway notification, as posted to the webhook endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Gateway-assigned transaction id
    pub unique_id: String,

    /// `sha1(unique_id + secret)`, hex-encoded
    pub signature: String,

    /// Locally generated transaction id, when echoed back
    #[serde(default)]
    pub transaction_id: Option<String>,

    /// Transaction type of the original submission (e.g. `sdd_sale`)
    #[serde(default)]
    pub transaction_type: Option<String>,

    /// Notification type, when the gateway distinguishes it from the
    /// transaction type (e.g. `chargeback`)
    #[serde(default)]
    pub notification_type: Option<String>,

    /// Settled transaction status
    #[serde(default)]
    pub status: Option<String>,

    /// Chargeback reason code
    #[serde(default)]
    pub reason_code: Option<String>,

    /// Chargeback reason description
    #[serde(default)]
    pub reason_description: Option<String>,
}

/// How a notification must be processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingType {
    /// Settle the attempt the notification refers to
    StatusUpdate,
    /// Route through chargeback application
    Chargeback,
}

impl Notification {
    /// Classify the notification; `None` for event shapes we do not
    /// process (acknowledged so the gateway stops retrying, never queued)
    pub fn processing_type(&self) -> Option<ProcessingType> {
        let is_chargeback = [&self.notification_type, &self.transaction_type, &self.status]
            .into_iter()
            .flatten()
            .any(|v| v.to_lowercase().contains("chargeback"));
        if is_chargeback {
            return Some(ProcessingType::Chargeback);
        }

        let recognized_type = self.transaction_type.as_deref().is_some_and(|t| {
            let t = t.to_lowercase();
            t.starts_with("sdd") || t == "sale" || t == "transaction"
        });
        if self.status.is_some() || recognized_type {
            Some(ProcessingType::StatusUpdate)
        } else {
            None
        }
    }

    /// Event type component of the idempotency key, as delivered
    pub fn event_type(&self) -> &str {
        self.notification_type
            .as_deref()
            .or(self.transaction_type.as_deref())
            .unwrap_or("transaction")
    }
}

/// What ingestion resolved to (drives the HTTP status)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestDecision {
    /// Registered and queued for processing
    Accepted {
        /// Event record id
        event_id: Uuid,
        /// How it will be processed
        kind: ProcessingType,
    },
    /// Already seen; acknowledged without re-processing
    Duplicate,
    /// Authentic but of a shape we do not process; acknowledged, recorded,
    /// never queued
    Ignored,
    /// Signature did not verify; nothing was queued
    InvalidSignature,
}

/// The synchronous ingestion path
pub struct WebhookIngestor {
    config: WebhookConfig,
    events: Arc<dyn WebhookEventRepo>,
    queue: JobQueue,
}

impl WebhookIngestor {
    /// Wire up an ingestor
    pub fn new(config: WebhookConfig, events: Arc<dyn WebhookEventRepo>, queue: JobQueue) -> Self {
        Self {
            config,
            events,
            queue,
        }
    }

    /// Authenticate, register and enqueue one notification
    ///
    /// `raw_payload` is the body as delivered, kept on the event record for
    /// audit and replay.
    pub async fn ingest(
        &self,
        notification: Notification,
        raw_payload: String,
    ) -> Result<IngestDecision> {
        if !verify_signature(
            &notification.unique_id,
            &notification.signature,
            &self.config.secret,
        ) {
            warn!(
                unique_id = %notification.unique_id,
                "Notification signature rejected"
            );
            WEBHOOKS_RECEIVED_TOTAL.with_label_values(&["invalid_signature"]).inc();
            return Ok(IngestDecision::InvalidSignature);
        }

        let key = WebhookKey::new(
            self.config.provider.clone(),
            notification.unique_id.clone(),
            notification.event_type().to_string(),
        );
        let event_id = match self.events.register(key.clone(), raw_payload, true).await? {
            Registration::Fresh(event_id) => event_id,
            Registration::Duplicate => {
                info!(%key, "Duplicate notification acknowledged");
                WEBHOOKS_RECEIVED_TOTAL.with_label_values(&["duplicate"]).inc();
                return Ok(IngestDecision::Duplicate);
            }
        };

        let Some(kind) = notification.processing_type() else {
            warn!(%key, %event_id, "Unsupported event shape acknowledged, not queued");
            self.events
                .mark_completed(event_id, Some("ignored: unsupported event shape".to_string()))
                .await?;
            WEBHOOKS_RECEIVED_TOTAL.with_label_values(&["ignored"]).inc();
            return Ok(IngestDecision::Ignored);
        };

        self.queue.enqueue(
            Lane::Webhooks,
            Job::new(Some(event_id), JobKind::ProcessNotification(notification)),
        )?;
        self.events.mark_queued(event_id).await?;

        info!(%key, %event_id, ?kind, "Notification queued");
        WEBHOOKS_RECEIVED_TOTAL.with_label_values(&["accepted"]).inc();
        Ok(IngestDecision::Accepted { event_id, kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use billing_core::store::InMemoryWebhookEventRepo;
    use billing_core::types::WebhookState;
    use gateway_client::signature::expected_signature;

    fn notification(unique_id: &str, secret: &str) -> Notification {
        Notification {
            unique_id: unique_id.to_string(),
            signature: expected_signature(unique_id, secret),
            transaction_id: Some("rcp_x".to_string()),
            transaction_type: Some("sdd_sale".to_string()),
            notification_type: None,
            status: Some("approved".to_string()),
            reason_code: None,
            reason_description: None,
        }
    }

    fn fixture() -> (WebhookIngestor, Arc<InMemoryWebhookEventRepo>, JobQueue) {
        let mut config = WebhookConfig::default();
        config.secret = "whsec".to_string();
        let events = Arc::new(InMemoryWebhookEventRepo::new());
        let queue = JobQueue::new();
        let ingestor = WebhookIngestor::new(config, events.clone(), queue.clone());
        (ingestor, events, queue)
    }

    #[tokio::test]
    async fn test_fresh_notification_is_registered_and_queued() {
        let (ingestor, events, queue) = fixture();
        let decision = ingestor
            .ingest(notification("EMG-1", "whsec"), "raw".to_string())
            .await
            .unwrap();

        let IngestDecision::Accepted { event_id, kind } = decision else {
            panic!("expected acceptance, got {:?}", decision);
        };
        assert_eq!(kind, ProcessingType::StatusUpdate);
        assert_eq!(queue.len(), 1);

        let event = events.get(event_id).await.unwrap();
        assert_eq!(event.state, WebhookState::Queued);
        assert!(event.signature_valid);
        assert_eq!(event.payload, "raw");
    }

    #[tokio::test]
    async fn test_duplicate_is_acknowledged_once_queued_once() {
        let (ingestor, _events, queue) = fixture();
        let first = ingestor
            .ingest(notification("EMG-1", "whsec"), "raw".to_string())
            .await
            .unwrap();
        assert!(matches!(first, IngestDecision::Accepted { .. }));

        let second = ingestor
            .ingest(notification("EMG-1", "whsec"), "raw".to_string())
            .await
            .unwrap();
        assert_eq!(second, IngestDecision::Duplicate);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_signature_registers_nothing() {
        let (ingestor, events, queue) = fixture();
        let mut bad = notification("EMG-1", "whsec");
        bad.signature = "deadbeef".to_string();

        let decision = ingestor.ingest(bad, "raw".to_string()).await.unwrap();
        assert_eq!(decision, IngestDecision::InvalidSignature);
        assert_eq!(queue.len(), 0);

        // A later legitimate delivery still goes through
        let retried = ingestor
            .ingest(notification("EMG-1", "whsec"), "raw".to_string())
            .await
            .unwrap();
        assert!(matches!(retried, IngestDecision::Accepted { .. }));
        drop(events);
    }

    #[test]
    fn test_classification() {
        let mut n = notification("EMG-1", "whsec");
        assert_eq!(n.processing_type(), Some(ProcessingType::StatusUpdate));
        assert_eq!(n.event_type(), "sdd_sale");

        n.notification_type = Some("chargeback".to_string());
        assert_eq!(n.processing_type(), Some(ProcessingType::Chargeback));
        assert_eq!(n.event_type(), "chargeback");

        // Same unique id, different event type: distinct idempotency keys
        let update = notification("EMG-1", "whsec");
        assert_ne!(update.event_type(), n.event_type());

        // Unknown shape, no status: not processable
        let mut odd = notification("EMG-1", "whsec");
        odd.status = None;
        odd.transaction_type = Some("fx_swap".to_string());
        assert_eq!(odd.processing_type(), None);
    }

    #[tokio::test]
    async fn test_unsupported_shape_is_acknowledged_not_queued() {
        let (ingestor, events, queue) = fixture();
        let mut odd = notification("EMG-1", "whsec");
        odd.status = None;
        odd.transaction_type = Some("fx_swap".to_string());

        let decision = ingestor.ingest(odd, "raw".to_string()).await.unwrap();
        assert_eq!(decision, IngestDecision::Ignored);
        assert_eq!(queue.len(), 0);

        // Still registered for audit, completed as ignored
        let second = ingestor
            .ingest(
                {
                    let mut again = notification("EMG-1", "whsec");
                    again.status = None;
                    again.transaction_type = Some("fx_swap".to_string());
                    again
                },
                "raw".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(second, IngestDecision::Duplicate);
        drop(events);
    }
}

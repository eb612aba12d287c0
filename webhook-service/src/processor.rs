//! Asynchronous notification processing
//!
//! The business half of webhook handling, executed by the worker pool.
//! Status updates settle the attempt the notification refers to and move
//! the account lifecycle; chargebacks delegate to the shared chargeback
//! path the reconciliation sweeper also uses.

use crate::error::{Error, Result};
use crate::ingest::{Notification, ProcessingType};
use billing_core::{
    store::{AccountRepo, AttemptOutcome, AttemptRepo, ProfileRepo, WebhookEventRepo},
    types::AttemptStatus,
};
use billing_engine::{
    account_status_for, ChargebackApplication, ChargebackProcessor, ChargebackRecord,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Applies notifications to local state
pub struct WebhookProcessor {
    accounts: Arc<dyn AccountRepo>,
    profiles: Arc<dyn ProfileRepo>,
    attempts: Arc<dyn AttemptRepo>,
    events: Arc<dyn WebhookEventRepo>,
    chargebacks: Arc<ChargebackProcessor>,
}

impl WebhookProcessor {
    /// Wire up a processor
    pub fn new(
        accounts: Arc<dyn AccountRepo>,
        profiles: Arc<dyn ProfileRepo>,
        attempts: Arc<dyn AttemptRepo>,
        events: Arc<dyn WebhookEventRepo>,
        chargebacks: Arc<ChargebackProcessor>,
    ) -> Self {
        Self {
            accounts,
            profiles,
            attempts,
            events,
            chargebacks,
        }
    }

    /// Apply one notification; returns the completion message for the
    /// event record
    pub async fn process(&self, notification: &Notification) -> Result<String> {
        match notification.processing_type() {
            Some(ProcessingType::Chargeback) => self.process_chargeback(notification).await,
            Some(ProcessingType::StatusUpdate) => self.process_status_update(notification).await,
            // Ingestion never queues these; tolerate a hand-replayed job
            None => Ok("ignored: unsupported event shape".to_string()),
        }
    }

    async fn process_chargeback(&self, notification: &Notification) -> Result<String> {
        let record = ChargebackRecord {
            unique_id: notification.unique_id.clone(),
            reason_code: notification.reason_code.clone(),
            reason_description: notification.reason_description.clone(),
            posted_at: None,
            received_at: Utc::now(),
            metadata: serde_json::to_value(notification)
                .map_err(|e| Error::Malformed(e.to_string()))?,
        };
        let application = self.chargebacks.apply(&record, "webhook").await?;
        Ok(match application {
            ChargebackApplication::Applied { blacklisted } => {
                format!("chargeback applied, blacklisted={}", blacklisted)
            }
            ChargebackApplication::AlreadyApplied => "chargeback already applied".to_string(),
            ChargebackApplication::Unmatched => "chargeback unmatched, recorded".to_string(),
        })
    }

    async fn process_status_update(&self, notification: &Notification) -> Result<String> {
        let status_str = notification
            .status
            .as_deref()
            .ok_or_else(|| Error::Malformed("status update without status".to_string()))?;
        let status = AttemptStatus::from_gateway(status_str);

        let attempt = match self.find_attempt(notification).await? {
            Some(attempt) => attempt,
            None => {
                warn!(
                    unique_id = %notification.unique_id,
                    "Status update for unknown transaction, recording for review"
                );
                self.events
                    .record_unmatched(notification.unique_id.clone(), "webhook".to_string())
                    .await?;
                return Ok("unmatched, recorded".to_string());
            }
        };

        let newly_approved =
            status == AttemptStatus::Approved && attempt.status != AttemptStatus::Approved;

        let outcome = AttemptOutcome {
            status,
            unique_id: Some(notification.unique_id.clone()),
            response_payload: None,
            error_code: None,
            error_message: None,
        };
        let finalized = self.attempts.finalize(attempt.id, outcome).await?;

        if let Some(account_status) = account_status_for(finalized.status) {
            self.accounts
                .update_status(finalized.account_id, account_status)
                .await?;
        }

        if newly_approved {
            if let Some(profile_id) = finalized.profile_id {
                self.profiles
                    .record_approval(profile_id, finalized.amount, Utc::now())
                    .await?;
            }
        }

        info!(
            attempt_id = %finalized.id,
            unique_id = %notification.unique_id,
            status = %finalized.status,
            "Status update applied"
        );
        Ok(format!("status set to {}", finalized.status))
    }

    async fn find_attempt(
        &self,
        notification: &Notification,
    ) -> Result<Option<billing_core::types::BillingAttempt>> {
        if let Some(attempt) = self
            .attempts
            .find_by_unique_id(&notification.unique_id)
            .await?
        {
            return Ok(Some(attempt));
        }
        // A submission that timed out locally never saw the gateway id;
        // the echoed transaction id still matches
        if let Some(transaction_id) = &notification.transaction_id {
            return Ok(self.attempts.find_by_transaction_id(transaction_id).await?);
        }
        Ok(None)
    }
}

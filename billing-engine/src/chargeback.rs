//! Chargeback application
//!
//! The single implementation both entry paths share: asynchronous webhook
//! notifications and the reconciliation sweeper's by-date listing. Applying
//! a chargeback flips the attempt, terminates the account, kills the
//! recurring profile and, for qualifying SEPA reason codes, blacklists the
//! debtor. Every step is idempotent, so a webhook and a sweep reporting the
//! same chargeback converge on the same state.

use crate::error::Result;
use billing_core::{
    config::WebhookConfig,
    store::{AccountRepo, AttemptRepo, ChargebackDetails, ProfileRepo, WebhookEventRepo},
    types::{AccountStatus, AttemptStatus},
    BlacklistGuard,
};
use chrono::{DateTime, NaiveDate, Utc};
use gateway_client::record_field;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Chargeback facts extracted from a gateway payload
#[derive(Debug, Clone)]
pub struct ChargebackRecord {
    /// Gateway-assigned id of the original transaction
    pub unique_id: String,

    /// Scheme reason code (e.g. AC04)
    pub reason_code: Option<String>,

    /// Reason description
    pub reason_description: Option<String>,

    /// Gateway posting date, when the payload carried one
    pub posted_at: Option<DateTime<Utc>>,

    /// When this record reached us
    pub received_at: DateTime<Utc>,

    /// Extra fields kept on the attempt's metadata blob
    pub metadata: Value,
}

impl ChargebackRecord {
    /// Extract a record from one entry of the gateway's by-date listing
    ///
    /// Returns `None` when the entry has no `unique_id` to match on.
    pub fn from_gateway_record(record: &Value) -> Option<Self> {
        let unique_id = record_field(record, "unique_id")?.to_string();
        let posted_at = record_field(record, "posted_date")
            .or_else(|| record_field(record, "created_at"))
            .and_then(parse_gateway_date);

        Some(Self {
            unique_id,
            reason_code: record_field(record, "reason_code").map(String::from),
            reason_description: record_field(record, "reason_description").map(String::from),
            posted_at,
            received_at: Utc::now(),
            metadata: record.clone(),
        })
    }
}

fn parse_gateway_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// What applying (or peeking at) a chargeback record resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargebackApplication {
    /// Attempt, account and profile were updated
    Applied {
        /// Whether the reason code also blacklisted the debtor
        blacklisted: bool,
    },
    /// Attempt was already chargebacked; metadata refreshed only
    AlreadyApplied,
    /// No local attempt carries this `unique_id`; recorded for review
    Unmatched,
}

/// Applies chargeback records to local state
pub struct ChargebackProcessor {
    config: WebhookConfig,
    accounts: Arc<dyn AccountRepo>,
    profiles: Arc<dyn ProfileRepo>,
    attempts: Arc<dyn AttemptRepo>,
    events: Arc<dyn WebhookEventRepo>,
    blacklist: Arc<dyn BlacklistGuard>,
}

impl ChargebackProcessor {
    /// Wire up a processor
    pub fn new(
        config: WebhookConfig,
        accounts: Arc<dyn AccountRepo>,
        profiles: Arc<dyn ProfileRepo>,
        attempts: Arc<dyn AttemptRepo>,
        events: Arc<dyn WebhookEventRepo>,
        blacklist: Arc<dyn BlacklistGuard>,
    ) -> Self {
        Self {
            config,
            accounts,
            profiles,
            attempts,
            events,
            blacklist,
        }
    }

    /// Apply a chargeback record end to end
    ///
    /// `context` names the entry path for the unmatched-transaction log
    /// ("webhook", "reconciliation 2026-08-30", …).
    pub async fn apply(
        &self,
        record: &ChargebackRecord,
        context: &str,
    ) -> Result<ChargebackApplication> {
        let Some(attempt) = self.attempts.find_by_unique_id(&record.unique_id).await? else {
            warn!(
                unique_id = %record.unique_id,
                context,
                "Chargeback for unknown transaction, recording for review"
            );
            self.events
                .record_unmatched(record.unique_id.clone(), context.to_string())
                .await?;
            return Ok(ChargebackApplication::Unmatched);
        };

        let already_applied = attempt.status == AttemptStatus::Chargebacked;

        let details = ChargebackDetails {
            reason_code: record.reason_code.clone(),
            reason_description: record.reason_description.clone(),
            posted_at: record.posted_at.unwrap_or(record.received_at),
            metadata: record.metadata.clone(),
        };
        let attempt = self.attempts.apply_chargeback(attempt.id, details).await?;

        if already_applied {
            info!(
                unique_id = %record.unique_id,
                attempt_id = %attempt.id,
                "Chargeback already applied, metadata refreshed"
            );
            return Ok(ChargebackApplication::AlreadyApplied);
        }

        let account = self.accounts.get(attempt.account_id).await?;
        self.accounts
            .update_status(account.id, AccountStatus::Chargebacked)
            .await?;

        if let Some(profile_id) = attempt.profile_id {
            self.profiles.deactivate(profile_id).await?;
        }

        let blacklisted = match &record.reason_code {
            Some(code) if self.config.auto_blacklist_codes.contains(code) => {
                self.blacklist
                    .add_debtor(
                        &account,
                        format!("Chargeback {}", code),
                        context.to_string(),
                    )
                    .await;
                true
            }
            _ => false,
        };

        info!(
            unique_id = %record.unique_id,
            attempt_id = %attempt.id,
            account_id = %account.id,
            reason_code = record.reason_code.as_deref().unwrap_or("-"),
            blacklisted,
            context,
            "Chargeback applied"
        );
        Ok(ChargebackApplication::Applied { blacklisted })
    }

    /// Classify a record without mutating anything (dry-run sweeps)
    pub async fn peek(&self, record: &ChargebackRecord) -> Result<ChargebackApplication> {
        match self.attempts.find_by_unique_id(&record.unique_id).await? {
            None => Ok(ChargebackApplication::Unmatched),
            Some(attempt) if attempt.status == AttemptStatus::Chargebacked => {
                Ok(ChargebackApplication::AlreadyApplied)
            }
            Some(_) => Ok(ChargebackApplication::Applied { blacklisted: false }),
        }
    }
}

//! Reconciliation sweeper
//!
//! Webhooks get lost. The sweeper closes the gap from the other side:
//! paging through the gateway's by-date chargeback listing and re-querying
//! stale pending attempts, applying whatever the gateway's ledger says
//! through the same idempotent chargeback path the webhook processor uses.
//! Running a sweep over already-settled days is safe by construction.

use crate::chargeback::{ChargebackApplication, ChargebackProcessor, ChargebackRecord};
use crate::dispatcher::{account_status_for, map_outcome};
use crate::error::{Error, Result};
use billing_core::{
    config::ReconciliationConfig,
    store::{AccountRepo, AttemptRepo},
    types::{AttemptId, AttemptStatus, BillingAttempt},
};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use gateway_client::{GatewayApi, GatewayOutcome};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Tally of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Gateway pages fetched
    pub pages: usize,
    /// Chargeback records seen
    pub records: usize,
    /// Chargebacks newly applied
    pub applied: usize,
    /// Records that were already applied locally
    pub already_applied: usize,
    /// Records with no local counterpart
    pub unmatched: usize,
    /// Stale pending attempts settled by re-query
    pub repaired: usize,
    /// Records or attempts the sweep could not settle
    pub errors: usize,
}

impl SyncStats {
    fn absorb(&mut self, other: SyncStats) {
        self.pages += other.pages;
        self.records += other.records;
        self.applied += other.applied;
        self.already_applied += other.already_applied;
        self.unmatched += other.unmatched;
        self.repaired += other.repaired;
        self.errors += other.errors;
    }

    fn count(&mut self, application: &ChargebackApplication) {
        match application {
            ChargebackApplication::Applied { .. } => self.applied += 1,
            ChargebackApplication::AlreadyApplied => self.already_applied += 1,
            ChargebackApplication::Unmatched => self.unmatched += 1,
        }
    }
}

/// What re-querying one attempt resolved to
#[derive(Debug)]
pub enum ReconcileResult {
    /// The gateway's state was applied to the attempt
    Updated(BillingAttempt),
    /// The gateway reported a chargeback; routed through chargeback
    /// application
    Chargeback(ChargebackApplication),
    /// The gateway could not be asked; nothing was mutated
    GatewayUnavailable(String),
}

/// Pulls gateway state back into local attempts
pub struct ReconciliationSweeper {
    config: ReconciliationConfig,
    gateway: Arc<dyn GatewayApi>,
    accounts: Arc<dyn AccountRepo>,
    attempts: Arc<dyn AttemptRepo>,
    chargebacks: Arc<ChargebackProcessor>,
}

impl ReconciliationSweeper {
    /// Wire up a sweeper
    pub fn new(
        config: ReconciliationConfig,
        gateway: Arc<dyn GatewayApi>,
        accounts: Arc<dyn AccountRepo>,
        attempts: Arc<dyn AttemptRepo>,
        chargebacks: Arc<ChargebackProcessor>,
    ) -> Self {
        Self {
            config,
            gateway,
            accounts,
            attempts,
            chargebacks,
        }
    }

    /// Re-query one attempt against the gateway's ledger
    ///
    /// Infrastructure failures leave the attempt untouched: "could not ask"
    /// must never be recorded as "the charge failed".
    #[instrument(skip(self))]
    pub async fn reconcile_one(&self, attempt_id: AttemptId) -> Result<ReconcileResult> {
        let attempt = self.attempts.get(attempt_id).await?;
        let unique_id = attempt
            .unique_id
            .clone()
            .ok_or(Error::MissingUniqueId(attempt_id))?;

        let outcome = self.gateway.reconcile(&unique_id).await;
        let GatewayOutcome::Success(response) = &outcome else {
            warn!(
                %attempt_id,
                unique_id = %unique_id,
                outcome = outcome.label(),
                "Reconcile query failed, leaving attempt untouched"
            );
            return Ok(ReconcileResult::GatewayUnavailable(outcome.label().to_string()));
        };

        let status = response
            .status()
            .map(AttemptStatus::from_gateway)
            .unwrap_or(AttemptStatus::Error);

        if status == AttemptStatus::Chargebacked {
            let record = chargeback_record_from_body(&unique_id, response.body());
            let application = self.chargebacks.apply(&record, "reconciliation").await?;
            return Ok(ReconcileResult::Chargeback(application));
        }

        let finalized = self
            .attempts
            .finalize(attempt_id, map_outcome(&outcome))
            .await?;
        if let Some(account_status) = account_status_for(finalized.status) {
            self.accounts
                .update_status(finalized.account_id, account_status)
                .await?;
        }
        info!(
            %attempt_id,
            unique_id = %unique_id,
            status = %finalized.status,
            "Attempt reconciled"
        );
        Ok(ReconcileResult::Updated(finalized))
    }

    /// Sweep one day of the gateway's chargeback listing
    pub async fn sync_by_date(&self, date: NaiveDate) -> Result<SyncStats> {
        let mut stats = SyncStats::default();
        let context = format!("reconciliation {}", date);
        let mut page = 1u32;

        loop {
            let outcome = self.gateway.fetch_by_date_range(date, date, page).await;
            let Some(response) = outcome.response().filter(|_| outcome.is_success()) else {
                warn!(%date, page, outcome = outcome.label(), "By-date fetch failed, aborting sweep");
                stats.errors += 1;
                return Ok(stats);
            };
            stats.pages += 1;

            for record in response.records() {
                stats.records += 1;
                let Some(record) = ChargebackRecord::from_gateway_record(record) else {
                    warn!(%date, page, "Listing entry without unique_id, skipping");
                    stats.errors += 1;
                    continue;
                };
                let application = if self.config.dry_run {
                    self.chargebacks.peek(&record).await?
                } else {
                    self.chargebacks.apply(&record, &context).await?
                };
                stats.count(&application);
            }

            let pages_count = response.pages_count().unwrap_or(1);
            if page >= pages_count {
                break;
            }
            page += 1;
            tokio::time::sleep(Duration::from_millis(self.config.page_delay_ms)).await;
        }

        info!(
            %date,
            dry_run = self.config.dry_run,
            pages = stats.pages,
            records = stats.records,
            applied = stats.applied,
            already_applied = stats.already_applied,
            unmatched = stats.unmatched,
            "Chargeback sweep complete"
        );
        Ok(stats)
    }

    /// Sweep an inclusive range of days
    pub async fn sync_by_date_range(&self, start: NaiveDate, end: NaiveDate) -> Result<SyncStats> {
        let mut stats = SyncStats::default();
        let mut date = start;
        while date <= end {
            stats.absorb(self.sync_by_date(date).await?);
            date += ChronoDuration::days(1);
        }
        Ok(stats)
    }

    /// Re-query every pending attempt older than the staleness cutoff
    pub async fn sync_stale_pending(&self) -> Result<SyncStats> {
        let cutoff = Utc::now() - ChronoDuration::hours(self.config.stale_pending_hours);
        let stale = self.attempts.stale_pending(cutoff).await?;
        let mut stats = SyncStats::default();

        for attempt in stale {
            stats.records += 1;
            if self.config.dry_run {
                continue;
            }
            match self.reconcile_one(attempt.id).await {
                Ok(ReconcileResult::Updated(updated)) => {
                    if updated.status != AttemptStatus::Pending {
                        stats.repaired += 1;
                    }
                }
                Ok(ReconcileResult::Chargeback(application)) => stats.count(&application),
                Ok(ReconcileResult::GatewayUnavailable(_)) => stats.errors += 1,
                Err(Error::MissingUniqueId(id)) => {
                    // Submitted but never answered; nothing to query by
                    warn!(attempt_id = %id, "Stale pending attempt has no gateway id");
                    stats.errors += 1;
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            stale = stats.records,
            repaired = stats.repaired,
            errors = stats.errors,
            dry_run = self.config.dry_run,
            "Stale pending sweep complete"
        );
        Ok(stats)
    }
}

fn chargeback_record_from_body(unique_id: &str, body: &Value) -> ChargebackRecord {
    let field = |name: &str| {
        body.as_object()
            .and_then(|o| o.get(name))
            .and_then(Value::as_str)
    };
    ChargebackRecord {
        unique_id: unique_id.to_string(),
        reason_code: field("reason_code").map(String::from),
        reason_description: field("reason_description").map(String::from),
        posted_at: None,
        received_at: Utc::now(),
        metadata: body.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use billing_core::config::WebhookConfig;
    use billing_core::store::*;
    use billing_core::types::*;
    use billing_core::InMemoryBlacklist;
    use gateway_client::MockGateway;
    use rust_decimal_macros::dec;
    use serde_json::json;

    struct Fixture {
        sweeper: ReconciliationSweeper,
        gateway: Arc<MockGateway>,
        accounts: Arc<InMemoryAccountRepo>,
        attempts: Arc<InMemoryAttemptRepo>,
        events: Arc<InMemoryWebhookEventRepo>,
    }

    fn fixture(recon: ReconciliationConfig) -> Fixture {
        let gateway = Arc::new(MockGateway::new());
        let accounts = Arc::new(InMemoryAccountRepo::new());
        let profiles = Arc::new(InMemoryProfileRepo::new());
        let attempts = Arc::new(InMemoryAttemptRepo::new());
        let events = Arc::new(InMemoryWebhookEventRepo::new());
        let blacklist = Arc::new(InMemoryBlacklist::new());
        let chargebacks = Arc::new(ChargebackProcessor::new(
            WebhookConfig::default(),
            accounts.clone(),
            profiles,
            attempts.clone(),
            events.clone(),
            blacklist,
        ));
        let sweeper = ReconciliationSweeper::new(
            recon,
            gateway.clone(),
            accounts.clone(),
            attempts.clone(),
            chargebacks,
        );
        Fixture {
            sweeper,
            gateway,
            accounts,
            attempts,
            events,
        }
    }

    fn account() -> Account {
        let now = Utc::now();
        Account {
            id: AccountId::new(),
            upload_id: UploadId::new(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: None,
            iban: Iban::new("DE89370400440532013000"),
            bic: None,
            amount: dec!(150.00),
            validation_status: ValidationStatus::Valid,
            status: AccountStatus::Billing,
            created_at: now,
            updated_at: now,
        }
    }

    fn attempt(account_id: AccountId, status: AttemptStatus, unique_id: Option<&str>) -> BillingAttempt {
        let now = Utc::now();
        BillingAttempt {
            id: AttemptId::new(),
            account_id,
            profile_id: None,
            transaction_id: format!("rcp_{}", AttemptId::new()),
            unique_id: unique_id.map(String::from),
            attempt_number: 1,
            amount: dec!(150.00),
            cycle_anchor: None,
            status,
            error_code: None,
            error_message: None,
            request_payload: None,
            response_payload: None,
            chargeback_reason_code: None,
            chargeback_reason_description: None,
            chargebacked_at: None,
            metadata: json!({}),
            created_at: now - ChronoDuration::hours(48),
            updated_at: now - ChronoDuration::hours(48),
        }
    }

    fn listing_page(entries: &str, pages_count: u32) -> GatewayOutcome {
        GatewayOutcome::from_body(&format!(
            "<chargeback_responses pages_count=\"{}\">{}</chargeback_responses>",
            pages_count, entries
        ))
    }

    const ENTRY: &str = "<chargeback_response><unique_id>EMG-1</unique_id><reason_code>AC04</reason_code><reason_description>No such account</reason_description></chargeback_response>";

    #[tokio::test]
    async fn test_reconcile_one_repairs_lost_approval() {
        let f = fixture(ReconciliationConfig::default());
        let acct = account();
        f.accounts.insert(acct.clone()).await.unwrap();
        let pending = attempt(acct.id, AttemptStatus::Pending, Some("EMG-1"));
        f.attempts.insert(pending.clone()).await.unwrap();
        f.gateway
            .push_outcome(MockGateway::response("approved", "EMG-1"))
            .await;

        let result = f.sweeper.reconcile_one(pending.id).await.unwrap();
        match result {
            ReconcileResult::Updated(updated) => {
                assert_eq!(updated.status, AttemptStatus::Approved)
            }
            other => panic!("expected update, got {:?}", other),
        }
        let acct = f.accounts.get(acct.id).await.unwrap();
        assert_eq!(acct.status, AccountStatus::Recovered);
    }

    #[tokio::test]
    async fn test_reconcile_one_leaves_attempt_on_network_failure() {
        let f = fixture(ReconciliationConfig::default());
        let acct = account();
        f.accounts.insert(acct.clone()).await.unwrap();
        let pending = attempt(acct.id, AttemptStatus::Pending, Some("EMG-1"));
        f.attempts.insert(pending.clone()).await.unwrap();
        f.gateway
            .push_outcome(GatewayOutcome::NetworkError("timed out".to_string()))
            .await;

        let result = f.sweeper.reconcile_one(pending.id).await.unwrap();
        assert!(matches!(result, ReconcileResult::GatewayUnavailable(_)));
        let unchanged = f.attempts.get(pending.id).await.unwrap();
        assert_eq!(unchanged.status, AttemptStatus::Pending);
    }

    #[tokio::test]
    async fn test_reconcile_one_requires_unique_id() {
        let f = fixture(ReconciliationConfig::default());
        let acct = account();
        f.accounts.insert(acct.clone()).await.unwrap();
        let pending = attempt(acct.id, AttemptStatus::Pending, None);
        f.attempts.insert(pending.clone()).await.unwrap();

        let err = f.sweeper.reconcile_one(pending.id).await.unwrap_err();
        assert!(matches!(err, Error::MissingUniqueId(_)));
    }

    #[tokio::test]
    async fn test_sync_by_date_pages_and_applies() {
        let mut recon = ReconciliationConfig::default();
        recon.page_delay_ms = 0;
        let f = fixture(recon);
        let acct = account();
        f.accounts.insert(acct.clone()).await.unwrap();
        f.attempts
            .insert(attempt(acct.id, AttemptStatus::Approved, Some("EMG-1")))
            .await
            .unwrap();

        // Two pages: the matched chargeback, then an unmatched one
        f.gateway.push_outcome(listing_page(ENTRY, 2)).await;
        f.gateway
            .push_outcome(listing_page(
                "<chargeback_response><unique_id>EMG-404</unique_id><reason_code>MD07</reason_code></chargeback_response>",
                2,
            ))
            .await;

        let date = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        let stats = f.sweeper.sync_by_date(date).await.unwrap();
        assert_eq!(stats.pages, 2);
        assert_eq!(stats.records, 2);
        assert_eq!(stats.applied, 1);
        assert_eq!(stats.unmatched, 1);

        let acct = f.accounts.get(acct.id).await.unwrap();
        assert_eq!(acct.status, AccountStatus::Chargebacked);
        assert_eq!(f.events.unmatched().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_by_date_is_idempotent_across_runs() {
        let mut recon = ReconciliationConfig::default();
        recon.page_delay_ms = 0;
        let f = fixture(recon);
        let acct = account();
        f.accounts.insert(acct.clone()).await.unwrap();
        f.attempts
            .insert(attempt(acct.id, AttemptStatus::Approved, Some("EMG-1")))
            .await
            .unwrap();

        f.gateway.push_outcome(listing_page(ENTRY, 1)).await;
        f.gateway.push_outcome(listing_page(ENTRY, 1)).await;

        let date = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        let first = f.sweeper.sync_by_date(date).await.unwrap();
        let second = f.sweeper.sync_by_date(date).await.unwrap();
        assert_eq!(first.applied, 1);
        assert_eq!(second.applied, 0);
        assert_eq!(second.already_applied, 1);
    }

    #[tokio::test]
    async fn test_dry_run_counts_without_mutating() {
        let mut recon = ReconciliationConfig::default();
        recon.page_delay_ms = 0;
        recon.dry_run = true;
        let f = fixture(recon);
        let acct = account();
        f.accounts.insert(acct.clone()).await.unwrap();
        let approved = attempt(acct.id, AttemptStatus::Approved, Some("EMG-1"));
        f.attempts.insert(approved.clone()).await.unwrap();

        f.gateway.push_outcome(listing_page(ENTRY, 1)).await;

        let date = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        let stats = f.sweeper.sync_by_date(date).await.unwrap();
        assert_eq!(stats.applied, 1);

        let untouched = f.attempts.get(approved.id).await.unwrap();
        assert_eq!(untouched.status, AttemptStatus::Approved);
        let acct = f.accounts.get(acct.id).await.unwrap();
        assert_eq!(acct.status, AccountStatus::Billing);
    }

    #[tokio::test]
    async fn test_sync_stale_pending_repairs_and_counts_missing_ids() {
        let f = fixture(ReconciliationConfig::default());
        let acct = account();
        f.accounts.insert(acct.clone()).await.unwrap();
        let with_id = attempt(acct.id, AttemptStatus::Pending, Some("EMG-1"));
        f.attempts.insert(with_id.clone()).await.unwrap();

        let other = account();
        f.accounts.insert(other.clone()).await.unwrap();
        f.attempts
            .insert(attempt(other.id, AttemptStatus::Pending, None))
            .await
            .unwrap();

        f.gateway
            .push_outcome(MockGateway::response("declined", "EMG-1"))
            .await;

        let stats = f.sweeper.sync_stale_pending().await.unwrap();
        assert_eq!(stats.records, 2);
        assert_eq!(stats.repaired, 1);
        assert_eq!(stats.errors, 1);

        let repaired = f.attempts.get(with_id.id).await.unwrap();
        assert_eq!(repaired.status, AttemptStatus::Declined);
        let acct = f.accounts.get(acct.id).await.unwrap();
        assert_eq!(acct.status, AccountStatus::Pending);
    }
}

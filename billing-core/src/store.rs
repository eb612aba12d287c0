//! Repository interfaces and in-memory implementations
//!
//! Components never touch storage directly; they receive `Arc<dyn …Repo>`
//! handles and mutate through named operations. Compound updates (attempt
//! finalization, chargeback application, profile approval accounting,
//! webhook registration) execute under a single write-lock acquisition so
//! concurrent workers observe them atomically — the in-memory stand-in for
//! the row-locked transactions a persistent backend would use.

use crate::{
    error::{Error, Result},
    types::*,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Account repository
#[async_trait]
pub trait AccountRepo: Send + Sync {
    /// Fetch an account
    async fn get(&self, id: AccountId) -> Result<Account>;

    /// Insert a new account
    async fn insert(&self, account: Account) -> Result<()>;

    /// Update the lifecycle status
    async fn update_status(&self, id: AccountId, status: AccountStatus) -> Result<()>;

    /// Billable candidates of an upload batch
    async fn candidates_for_upload(&self, upload_id: UploadId) -> Result<Vec<Account>>;
}

/// New billing profile parameters
#[derive(Debug, Clone)]
pub struct NewProfile {
    /// IBAN the profile is keyed by
    pub iban: Iban,
    /// Billing model
    pub model: BillingModel,
    /// Configured charge amount per cycle
    pub amount: Decimal,
    /// Cycle length in days
    pub cycle_days: i64,
}

/// Billing profile repository
#[async_trait]
pub trait ProfileRepo: Send + Sync {
    /// Fetch a profile
    async fn get(&self, id: ProfileId) -> Result<BillingProfile>;

    /// Profile for an IBAN, if any (active profile preferred)
    async fn find_by_iban(&self, iban: &Iban) -> Result<Option<BillingProfile>>;

    /// Create a profile, enforcing model exclusivity: an IBAN may hold at
    /// most one active non-legacy profile at a time
    async fn create(&self, new: NewProfile) -> Result<BillingProfile>;

    /// Account an approved charge: add to the lifetime total, stamp the
    /// success, and advance the cycle lock — one atomic mutation
    async fn record_approval(
        &self,
        id: ProfileId,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<BillingProfile>;

    /// Deactivate a profile (chargeback)
    async fn deactivate(&self, id: ProfileId) -> Result<()>;
}

/// Outcome of a gateway submission, applied in one step
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    /// Mapped local status
    pub status: AttemptStatus,
    /// Gateway-assigned id, if the response carried one
    pub unique_id: Option<String>,
    /// Raw response body
    pub response_payload: Option<String>,
    /// Gateway error code
    pub error_code: Option<String>,
    /// Gateway error message
    pub error_message: Option<String>,
}

/// Chargeback facts, applied in one step
#[derive(Debug, Clone)]
pub struct ChargebackDetails {
    /// Scheme reason code (e.g. AC04)
    pub reason_code: Option<String>,
    /// Reason description
    pub reason_description: Option<String>,
    /// Gateway posting date, else receipt time
    pub posted_at: DateTime<Utc>,
    /// Metadata to merge into the attempt's metadata blob
    pub metadata: serde_json::Value,
}

/// Billing attempt repository
#[async_trait]
pub trait AttemptRepo: Send + Sync {
    /// Insert a new attempt
    ///
    /// Rejects a duplicate `transaction_id` and a second `Pending` attempt
    /// for the same account.
    async fn insert(&self, attempt: BillingAttempt) -> Result<()>;

    /// Fetch an attempt
    async fn get(&self, id: AttemptId) -> Result<BillingAttempt>;

    /// Look up by the locally generated transaction id
    async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<BillingAttempt>>;

    /// Look up by the gateway-assigned id
    async fn find_by_unique_id(&self, unique_id: &str) -> Result<Option<BillingAttempt>>;

    /// All attempts of an account
    async fn for_account(&self, account_id: AccountId) -> Result<Vec<BillingAttempt>>;

    /// `max(attempt_number) + 1` for an account
    async fn next_attempt_number(&self, account_id: AccountId) -> Result<u32>;

    /// Any attempt currently pending for the account?
    async fn has_pending_for_account(&self, account_id: AccountId) -> Result<bool>;

    /// Any pending attempt on this profile from a *different* account?
    /// Guards cross-upload double submission for the same IBAN.
    async fn has_other_pending_for_profile(
        &self,
        profile_id: ProfileId,
        account_id: AccountId,
    ) -> Result<bool>;

    /// Any prior approved attempt for the account?
    async fn has_approved_for_account(&self, account_id: AccountId) -> Result<bool>;

    /// Apply a gateway outcome: status, gateway id, response payload and
    /// error fields in one step
    async fn finalize(&self, id: AttemptId, outcome: AttemptOutcome) -> Result<BillingAttempt>;

    /// Pending attempts created before the cutoff
    async fn stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<BillingAttempt>>;

    /// Apply a chargeback: status, reason, timestamp and metadata merge in
    /// one step; idempotent on an already chargebacked attempt (metadata
    /// refresh only)
    async fn apply_chargeback(
        &self,
        id: AttemptId,
        details: ChargebackDetails,
    ) -> Result<BillingAttempt>;
}

/// Result of idempotency registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// First time this key was seen; the event record was created
    Fresh(Uuid),
    /// Key already registered; processing must not run again
    Duplicate,
}

/// Gateway transaction with no local counterpart, kept for manual review
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UnmatchedTransaction {
    /// Gateway-assigned id
    pub unique_id: String,
    /// Where it surfaced (webhook, reconciliation date, …)
    pub context: String,
    /// When it was recorded
    pub seen_at: DateTime<Utc>,
}

/// Webhook event repository (the idempotency store; rows never deleted)
#[async_trait]
pub trait WebhookEventRepo: Send + Sync {
    /// Atomic check-and-insert for an idempotency key
    ///
    /// The registration happens-before the processing job is queued, so a
    /// duplicate delivery arriving before processing completes is still
    /// detected as a duplicate.
    async fn register(
        &self,
        key: WebhookKey,
        payload: String,
        signature_valid: bool,
    ) -> Result<Registration>;

    /// Fetch an event record
    async fn get(&self, id: Uuid) -> Result<WebhookEvent>;

    /// Event handed to the job queue
    async fn mark_queued(&self, id: Uuid) -> Result<()>;

    /// Business effect applied
    async fn mark_completed(&self, id: Uuid, message: Option<String>) -> Result<()>;

    /// Retries exhausted
    async fn mark_failed(&self, id: Uuid, message: String) -> Result<()>;

    /// Record a transaction with no local counterpart
    async fn record_unmatched(&self, unique_id: String, context: String) -> Result<()>;

    /// Unmatched transactions awaiting manual review
    async fn unmatched(&self) -> Result<Vec<UnmatchedTransaction>>;
}

fn merge_metadata(target: &mut serde_json::Value, incoming: &serde_json::Value) {
    match (target, incoming) {
        (serde_json::Value::Object(t), serde_json::Value::Object(i)) => {
            for (k, v) in i {
                t.insert(k.clone(), v.clone());
            }
        }
        (t, i) => {
            if !i.is_null() {
                *t = i.clone();
            }
        }
    }
}

/// In-memory account repository
#[derive(Debug, Default)]
pub struct InMemoryAccountRepo {
    accounts: RwLock<HashMap<AccountId, Account>>,
}

impl InMemoryAccountRepo {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountRepo for InMemoryAccountRepo {
    async fn get(&self, id: AccountId) -> Result<Account> {
        let accounts = self.accounts.read().await;
        accounts.get(&id).cloned().ok_or(Error::AccountNotFound(id))
    }

    async fn insert(&self, account: Account) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        accounts.insert(account.id, account);
        Ok(())
    }

    async fn update_status(&self, id: AccountId, status: AccountStatus) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let account = accounts.get_mut(&id).ok_or(Error::AccountNotFound(id))?;
        account.status = status;
        account.updated_at = Utc::now();
        Ok(())
    }

    async fn candidates_for_upload(&self, upload_id: UploadId) -> Result<Vec<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .values()
            .filter(|a| a.upload_id == upload_id && a.status.is_billable())
            .cloned()
            .collect())
    }
}

/// In-memory billing profile repository
#[derive(Debug, Default)]
pub struct InMemoryProfileRepo {
    profiles: RwLock<HashMap<ProfileId, BillingProfile>>,
}

impl InMemoryProfileRepo {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileRepo for InMemoryProfileRepo {
    async fn get(&self, id: ProfileId) -> Result<BillingProfile> {
        let profiles = self.profiles.read().await;
        profiles.get(&id).cloned().ok_or(Error::ProfileNotFound(id))
    }

    async fn find_by_iban(&self, iban: &Iban) -> Result<Option<BillingProfile>> {
        let profiles = self.profiles.read().await;
        let mut found: Option<BillingProfile> = None;
        for profile in profiles.values() {
            if &profile.iban == iban {
                // Prefer the active profile when both exist
                if profile.is_active || found.is_none() {
                    found = Some(profile.clone());
                }
            }
        }
        Ok(found)
    }

    async fn create(&self, new: NewProfile) -> Result<BillingProfile> {
        let mut profiles = self.profiles.write().await;

        if new.model.is_recurring() {
            if let Some(existing) = profiles
                .values()
                .find(|p| p.iban == new.iban && p.is_active && p.model.is_recurring())
            {
                return Err(Error::ModelConflict {
                    existing: existing.model,
                    requested: new.model,
                });
            }
        }

        let now = Utc::now();
        let profile = BillingProfile {
            id: ProfileId::new(),
            iban: new.iban,
            model: new.model,
            amount: new.amount,
            cycle_days: new.cycle_days,
            next_bill_at: None,
            lifetime_charged_amount: Decimal::ZERO,
            is_active: true,
            last_success_at: None,
            created_at: now,
            updated_at: now,
        };
        profiles.insert(profile.id, profile.clone());
        Ok(profile)
    }

    async fn record_approval(
        &self,
        id: ProfileId,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<BillingProfile> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles.get_mut(&id).ok_or(Error::ProfileNotFound(id))?;

        profile.lifetime_charged_amount += amount;
        profile.last_success_at = Some(now);
        profile.next_bill_at = Some(now + Duration::days(profile.cycle_days));
        profile.updated_at = now;

        Ok(profile.clone())
    }

    async fn deactivate(&self, id: ProfileId) -> Result<()> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles.get_mut(&id).ok_or(Error::ProfileNotFound(id))?;
        profile.is_active = false;
        profile.updated_at = Utc::now();
        Ok(())
    }
}

/// In-memory billing attempt repository
#[derive(Debug, Default)]
pub struct InMemoryAttemptRepo {
    attempts: RwLock<HashMap<AttemptId, BillingAttempt>>,
}

impl InMemoryAttemptRepo {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttemptRepo for InMemoryAttemptRepo {
    async fn insert(&self, attempt: BillingAttempt) -> Result<()> {
        let mut attempts = self.attempts.write().await;

        if attempts
            .values()
            .any(|a| a.transaction_id == attempt.transaction_id)
        {
            return Err(Error::DuplicateTransactionId(attempt.transaction_id));
        }

        if attempt.status == AttemptStatus::Pending
            && attempts
                .values()
                .any(|a| a.account_id == attempt.account_id && a.status == AttemptStatus::Pending)
        {
            return Err(Error::PendingAttemptExists(attempt.account_id));
        }

        attempts.insert(attempt.id, attempt);
        Ok(())
    }

    async fn get(&self, id: AttemptId) -> Result<BillingAttempt> {
        let attempts = self.attempts.read().await;
        attempts.get(&id).cloned().ok_or(Error::AttemptNotFound(id))
    }

    async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<BillingAttempt>> {
        let attempts = self.attempts.read().await;
        Ok(attempts
            .values()
            .find(|a| a.transaction_id == transaction_id)
            .cloned())
    }

    async fn find_by_unique_id(&self, unique_id: &str) -> Result<Option<BillingAttempt>> {
        let attempts = self.attempts.read().await;
        Ok(attempts
            .values()
            .find(|a| a.unique_id.as_deref() == Some(unique_id))
            .cloned())
    }

    async fn for_account(&self, account_id: AccountId) -> Result<Vec<BillingAttempt>> {
        let attempts = self.attempts.read().await;
        let mut result: Vec<BillingAttempt> = attempts
            .values()
            .filter(|a| a.account_id == account_id)
            .cloned()
            .collect();
        result.sort_by_key(|a| a.attempt_number);
        Ok(result)
    }

    async fn next_attempt_number(&self, account_id: AccountId) -> Result<u32> {
        let attempts = self.attempts.read().await;
        Ok(attempts
            .values()
            .filter(|a| a.account_id == account_id)
            .map(|a| a.attempt_number)
            .max()
            .unwrap_or(0)
            + 1)
    }

    async fn has_pending_for_account(&self, account_id: AccountId) -> Result<bool> {
        let attempts = self.attempts.read().await;
        Ok(attempts
            .values()
            .any(|a| a.account_id == account_id && a.status == AttemptStatus::Pending))
    }

    async fn has_other_pending_for_profile(
        &self,
        profile_id: ProfileId,
        account_id: AccountId,
    ) -> Result<bool> {
        let attempts = self.attempts.read().await;
        Ok(attempts.values().any(|a| {
            a.profile_id == Some(profile_id)
                && a.account_id != account_id
                && a.status == AttemptStatus::Pending
        }))
    }

    async fn has_approved_for_account(&self, account_id: AccountId) -> Result<bool> {
        let attempts = self.attempts.read().await;
        Ok(attempts
            .values()
            .any(|a| a.account_id == account_id && a.status == AttemptStatus::Approved))
    }

    async fn finalize(&self, id: AttemptId, outcome: AttemptOutcome) -> Result<BillingAttempt> {
        let mut attempts = self.attempts.write().await;
        let attempt = attempts.get_mut(&id).ok_or(Error::AttemptNotFound(id))?;

        // Chargebacked is one-way; leaving it is never legal
        if attempt.status == AttemptStatus::Chargebacked
            && outcome.status != AttemptStatus::Chargebacked
        {
            return Err(Error::InvalidTransition {
                from: attempt.status,
                to: outcome.status,
            });
        }

        attempt.status = outcome.status;
        if attempt.unique_id.is_none() {
            attempt.unique_id = outcome.unique_id;
        }
        if outcome.response_payload.is_some() {
            attempt.response_payload = outcome.response_payload;
        }
        attempt.error_code = outcome.error_code;
        attempt.error_message = outcome.error_message;
        attempt.updated_at = Utc::now();

        Ok(attempt.clone())
    }

    async fn stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<BillingAttempt>> {
        let attempts = self.attempts.read().await;
        Ok(attempts
            .values()
            .filter(|a| a.status == AttemptStatus::Pending && a.created_at < cutoff)
            .cloned()
            .collect())
    }

    async fn apply_chargeback(
        &self,
        id: AttemptId,
        details: ChargebackDetails,
    ) -> Result<BillingAttempt> {
        let mut attempts = self.attempts.write().await;
        let attempt = attempts.get_mut(&id).ok_or(Error::AttemptNotFound(id))?;

        if attempt.status == AttemptStatus::Chargebacked {
            // Self-healing for a partially applied prior run
            merge_metadata(&mut attempt.metadata, &details.metadata);
            if attempt.chargeback_reason_code.is_none() {
                attempt.chargeback_reason_code = details.reason_code;
                attempt.chargeback_reason_description = details.reason_description;
            }
            if attempt.chargebacked_at.is_none() {
                attempt.chargebacked_at = Some(details.posted_at);
            }
            attempt.updated_at = Utc::now();
            return Ok(attempt.clone());
        }

        attempt.status = AttemptStatus::Chargebacked;
        attempt.chargeback_reason_code = details.reason_code;
        attempt.chargeback_reason_description = details.reason_description;
        attempt.chargebacked_at = Some(details.posted_at);
        merge_metadata(&mut attempt.metadata, &details.metadata);
        attempt.updated_at = Utc::now();

        Ok(attempt.clone())
    }
}

/// In-memory webhook event repository
#[derive(Debug, Default)]
pub struct InMemoryWebhookEventRepo {
    events: RwLock<HashMap<WebhookKey, WebhookEvent>>,
    unmatched: RwLock<Vec<UnmatchedTransaction>>,
}

impl InMemoryWebhookEventRepo {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookEventRepo for InMemoryWebhookEventRepo {
    async fn register(
        &self,
        key: WebhookKey,
        payload: String,
        signature_valid: bool,
    ) -> Result<Registration> {
        let mut events = self.events.write().await;

        if events.contains_key(&key) {
            return Ok(Registration::Duplicate);
        }

        let event = WebhookEvent {
            id: Uuid::new_v4(),
            key: key.clone(),
            payload,
            signature_valid,
            state: WebhookState::Received,
            message: None,
            received_at: Utc::now(),
            processed_at: None,
        };
        let id = event.id;
        events.insert(key, event);

        Ok(Registration::Fresh(id))
    }

    async fn get(&self, id: Uuid) -> Result<WebhookEvent> {
        let events = self.events.read().await;
        events
            .values()
            .find(|e| e.id == id)
            .cloned()
            .ok_or(Error::EventNotFound(id))
    }

    async fn mark_queued(&self, id: Uuid) -> Result<()> {
        let mut events = self.events.write().await;
        let event = events
            .values_mut()
            .find(|e| e.id == id)
            .ok_or(Error::EventNotFound(id))?;
        event.state = WebhookState::Queued;
        Ok(())
    }

    async fn mark_completed(&self, id: Uuid, message: Option<String>) -> Result<()> {
        let mut events = self.events.write().await;
        let event = events
            .values_mut()
            .find(|e| e.id == id)
            .ok_or(Error::EventNotFound(id))?;
        event.state = WebhookState::Completed;
        event.message = message;
        event.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, message: String) -> Result<()> {
        let mut events = self.events.write().await;
        let event = events
            .values_mut()
            .find(|e| e.id == id)
            .ok_or(Error::EventNotFound(id))?;
        event.state = WebhookState::Failed;
        event.message = Some(message);
        event.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn record_unmatched(&self, unique_id: String, context: String) -> Result<()> {
        let mut unmatched = self.unmatched.write().await;
        unmatched.push(UnmatchedTransaction {
            unique_id,
            context,
            seen_at: Utc::now(),
        });
        Ok(())
    }

    async fn unmatched(&self) -> Result<Vec<UnmatchedTransaction>> {
        let unmatched = self.unmatched.read().await;
        Ok(unmatched.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn account(upload: UploadId) -> Account {
        let now = Utc::now();
        Account {
            id: AccountId::new(),
            upload_id: upload,
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: Some("ada@example.org".to_string()),
            iban: Iban::new("DE89370400440532013000"),
            bic: None,
            amount: dec!(150.00),
            validation_status: ValidationStatus::Valid,
            status: AccountStatus::Uploaded,
            created_at: now,
            updated_at: now,
        }
    }

    fn attempt(account_id: AccountId, txn: &str, status: AttemptStatus) -> BillingAttempt {
        let now = Utc::now();
        BillingAttempt {
            id: AttemptId::new(),
            account_id,
            profile_id: None,
            transaction_id: txn.to_string(),
            unique_id: None,
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
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_duplicate_transaction_id_rejected() {
        let repo = InMemoryAttemptRepo::new();
        let a1 = account(UploadId::new());
        let a2 = account(UploadId::new());

        repo.insert(attempt(a1.id, "rcp_1", AttemptStatus::Approved))
            .await
            .unwrap();
        let err = repo
            .insert(attempt(a2.id, "rcp_1", AttemptStatus::Approved))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateTransactionId(_)));
    }

    #[tokio::test]
    async fn test_single_pending_per_account() {
        let repo = InMemoryAttemptRepo::new();
        let acct = account(UploadId::new());

        repo.insert(attempt(acct.id, "rcp_1", AttemptStatus::Pending))
            .await
            .unwrap();
        let err = repo
            .insert(attempt(acct.id, "rcp_2", AttemptStatus::Pending))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PendingAttemptExists(_)));

        // A terminal attempt for the same account is fine
        repo.insert(attempt(acct.id, "rcp_3", AttemptStatus::Declined))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_attempt_numbers_are_monotonic() {
        let repo = InMemoryAttemptRepo::new();
        let acct = account(UploadId::new());
        assert_eq!(repo.next_attempt_number(acct.id).await.unwrap(), 1);

        let mut a = attempt(acct.id, "rcp_1", AttemptStatus::Declined);
        a.attempt_number = 1;
        repo.insert(a).await.unwrap();
        assert_eq!(repo.next_attempt_number(acct.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_model_exclusivity_enforced_on_create() {
        let repo = InMemoryProfileRepo::new();
        let iban = Iban::new("DE89370400440532013000");

        repo.create(NewProfile {
            iban: iban.clone(),
            model: BillingModel::Flywheel,
            amount: dec!(49.00),
            cycle_days: 30,
        })
        .await
        .unwrap();

        let err = repo
            .create(NewProfile {
                iban: iban.clone(),
                model: BillingModel::Recovery,
                amount: dec!(99.00),
                cycle_days: 90,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ModelConflict { .. }));
    }

    #[tokio::test]
    async fn test_record_approval_advances_cycle_and_lifetime() {
        let repo = InMemoryProfileRepo::new();
        let profile = repo
            .create(NewProfile {
                iban: Iban::new("DE89370400440532013000"),
                model: BillingModel::Flywheel,
                amount: dec!(49.00),
                cycle_days: 30,
            })
            .await
            .unwrap();

        let now = Utc::now();
        let updated = repo.record_approval(profile.id, dec!(49.00), now).await.unwrap();
        assert_eq!(updated.lifetime_charged_amount, dec!(49.00));
        assert_eq!(updated.last_success_at, Some(now));
        assert_eq!(updated.next_bill_at, Some(now + Duration::days(30)));
    }

    #[tokio::test]
    async fn test_chargebacked_is_one_way() {
        let repo = InMemoryAttemptRepo::new();
        let acct = account(UploadId::new());
        let a = attempt(acct.id, "rcp_1", AttemptStatus::Approved);
        let id = a.id;
        repo.insert(a).await.unwrap();

        repo.apply_chargeback(
            id,
            ChargebackDetails {
                reason_code: Some("AC04".to_string()),
                reason_description: Some("Account closed".to_string()),
                posted_at: Utc::now(),
                metadata: serde_json::json!({"arn": "74837"}),
            },
        )
        .await
        .unwrap();

        let err = repo
            .finalize(
                id,
                AttemptOutcome {
                    status: AttemptStatus::Approved,
                    unique_id: None,
                    response_payload: None,
                    error_code: None,
                    error_message: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_chargeback_application_is_idempotent() {
        let repo = InMemoryAttemptRepo::new();
        let acct = account(UploadId::new());
        let a = attempt(acct.id, "rcp_1", AttemptStatus::Approved);
        let id = a.id;
        repo.insert(a).await.unwrap();

        let posted = Utc::now();
        let details = ChargebackDetails {
            reason_code: Some("AC04".to_string()),
            reason_description: None,
            posted_at: posted,
            metadata: serde_json::json!({"arn": "74837"}),
        };
        let first = repo.apply_chargeback(id, details.clone()).await.unwrap();
        let second = repo
            .apply_chargeback(
                id,
                ChargebackDetails {
                    metadata: serde_json::json!({"settlement": "2026-08-01"}),
                    ..details
                },
            )
            .await
            .unwrap();

        assert_eq!(first.chargebacked_at, second.chargebacked_at);
        assert_eq!(second.metadata["arn"], "74837");
        assert_eq!(second.metadata["settlement"], "2026-08-01");
    }

    #[tokio::test]
    async fn test_webhook_registration_is_atomic_check_and_insert() {
        let repo = InMemoryWebhookEventRepo::new();
        let key = WebhookKey::new("gateway", "EMG-1", "chargeback");

        let first = repo
            .register(key.clone(), "payload".to_string(), true)
            .await
            .unwrap();
        assert!(matches!(first, Registration::Fresh(_)));

        let second = repo
            .register(key, "payload".to_string(), true)
            .await
            .unwrap();
        assert_eq!(second, Registration::Duplicate);
    }

    #[tokio::test]
    async fn test_candidates_filter_on_status() {
        let repo = InMemoryAccountRepo::new();
        let upload = UploadId::new();
        let mut billable = account(upload);
        let mut recovered = account(upload);
        recovered.status = AccountStatus::Recovered;
        billable.status = AccountStatus::Pending;
        repo.insert(billable.clone()).await.unwrap();
        repo.insert(recovered).await.unwrap();

        let candidates = repo.candidates_for_upload(upload).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, billable.id);
    }
}

//! Billing dispatcher
//!
//! Drives the per-account billing flow: resolve eligibility, create the
//! recurring profile on first contact, persist a `Pending` attempt *before*
//! the gateway is called, submit, and apply the classified outcome. The
//! attempt row is the source of truth; a crash between submission and
//! finalization leaves a `Pending` row the reconciliation sweeper repairs.
//!
//! Batch submission runs under a sliding-window rate limit and a
//! consecutive-failure circuit breaker.

use crate::circuit_breaker::BatchCircuitBreaker;
use crate::eligibility::{self, Eligibility, EligibilityView};
use crate::error::{Error, Result};
use crate::rate_limit::SlidingWindowLimiter;
use billing_core::{
    config::EngineConfig,
    store::{AccountRepo, AttemptOutcome, AttemptRepo, NewProfile, ProfileRepo},
    types::{
        Account, AccountId, AccountStatus, AttemptId, AttemptStatus, BillingAttempt, BillingModel,
        BillingProfile, UploadId,
    },
    BlacklistGuard,
};
use chrono::Utc;
use gateway_client::{outcome::snippet, request, DebitRequest, GatewayApi, GatewayOutcome};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

const TRANSACTION_SUFFIX_LEN: usize = 8;

/// Account lifecycle transition implied by an attempt outcome
///
/// `None` means no transition: an asynchronous `Pending` outcome leaves the
/// account in `Billing` until the notification or a sweep settles it.
pub fn account_status_for(status: AttemptStatus) -> Option<AccountStatus> {
    match status {
        AttemptStatus::Approved => Some(AccountStatus::Recovered),
        AttemptStatus::Declined | AttemptStatus::Error | AttemptStatus::Voided => {
            Some(AccountStatus::Pending)
        }
        AttemptStatus::Chargebacked => Some(AccountStatus::Chargebacked),
        AttemptStatus::Pending => None,
    }
}

/// Tally of one batch run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Attempts that completed a gateway conversation
    pub submitted: usize,
    /// Of those, approved charges
    pub approved: usize,
    /// Accounts skipped by eligibility or the blacklist
    pub skipped: usize,
    /// Gateway infrastructure failures and local errors
    pub failed: usize,
}

/// Per-account billing flow and batch driver
pub struct Dispatcher {
    config: EngineConfig,
    gateway: Arc<dyn GatewayApi>,
    accounts: Arc<dyn AccountRepo>,
    profiles: Arc<dyn ProfileRepo>,
    attempts: Arc<dyn AttemptRepo>,
    blacklist: Arc<dyn BlacklistGuard>,
}

impl Dispatcher {
    /// Wire up a dispatcher
    pub fn new(
        config: EngineConfig,
        gateway: Arc<dyn GatewayApi>,
        accounts: Arc<dyn AccountRepo>,
        profiles: Arc<dyn ProfileRepo>,
        attempts: Arc<dyn AttemptRepo>,
        blacklist: Arc<dyn BlacklistGuard>,
    ) -> Self {
        Self {
            config,
            gateway,
            accounts,
            profiles,
            attempts,
            blacklist,
        }
    }

    /// Bill one account end to end
    ///
    /// Returns the finalized attempt. An eligible account whose gateway
    /// conversation fails still returns `Ok`: the failure is recorded on
    /// the attempt (`status == Error`), not raised.
    #[instrument(skip(self), fields(%account_id, %model))]
    pub async fn bill_one(
        &self,
        account_id: AccountId,
        model: BillingModel,
        override_amount: Option<Decimal>,
    ) -> Result<BillingAttempt> {
        let account = self.accounts.get(account_id).await?;
        let view = self.view_for(&account, model).await?;

        let amount = match eligibility::check(
            &account,
            model,
            override_amount,
            &view,
            self.config.billing.lifetime_cap,
            Utc::now(),
        ) {
            Eligibility::Eligible { amount } => amount,
            Eligibility::Rejected(reason) => return Err(Error::NotEligible(reason)),
        };

        let profile = self.ensure_profile(&account, model, amount, view.profile).await?;

        let request = DebitRequest {
            transaction_id: self.generate_transaction_id(account_id),
            amount,
            currency: self.config.billing.currency.clone(),
            usage: self.config.billing.statement_usage.clone(),
            iban: account.iban.clone(),
            bic: account.bic.clone(),
            first_name: account.first_name.clone(),
            last_name: account.last_name.clone(),
            notification_url: self.config.gateway.notification_url.clone(),
        };
        let request_payload = request::build_debit(&request)?;

        let now = Utc::now();
        let attempt = BillingAttempt {
            id: AttemptId::new(),
            account_id,
            profile_id: profile.as_ref().map(|p| p.id),
            transaction_id: request.transaction_id.clone(),
            unique_id: None,
            attempt_number: self.attempts.next_attempt_number(account_id).await?,
            amount,
            cycle_anchor: profile.as_ref().and_then(|p| p.next_bill_at),
            status: AttemptStatus::Pending,
            error_code: None,
            error_message: None,
            request_payload: Some(request_payload),
            response_payload: None,
            chargeback_reason_code: None,
            chargeback_reason_description: None,
            chargebacked_at: None,
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        };

        // The attempt row lands before the wire call; from here on every
        // path finalizes it
        self.attempts.insert(attempt.clone()).await?;
        self.accounts
            .update_status(account_id, AccountStatus::Billing)
            .await?;

        let outcome = self.gateway.submit_debit(&request).await;
        let applied = map_outcome(&outcome);
        let status = applied.status;
        let finalized = self.attempts.finalize(attempt.id, applied).await?;

        if let Some(account_status) = account_status_for(status) {
            self.accounts.update_status(account_id, account_status).await?;
        }

        if status == AttemptStatus::Approved {
            if let Some(profile) = &profile {
                self.profiles
                    .record_approval(profile.id, amount, Utc::now())
                    .await?;
            }
        }

        info!(
            attempt_id = %finalized.id,
            transaction_id = %finalized.transaction_id,
            unique_id = finalized.unique_id.as_deref().unwrap_or("-"),
            %amount,
            outcome = outcome.label(),
            %status,
            "Billing attempt finalized"
        );
        Ok(finalized)
    }

    /// Bill a list of accounts under the rate limit and circuit breaker
    pub async fn bill_batch(
        &self,
        account_ids: &[AccountId],
        model: BillingModel,
        override_amount: Option<Decimal>,
    ) -> Result<BatchOutcome> {
        let mut limiter = SlidingWindowLimiter::new(self.config.billing.requests_per_second);
        let mut breaker = BatchCircuitBreaker::new(
            self.config.billing.circuit_breaker_threshold,
            Duration::from_secs(self.config.billing.circuit_breaker_cooldown_secs),
        );
        let mut tally = BatchOutcome::default();

        for &account_id in account_ids {
            breaker.ready().await;
            limiter.acquire().await;

            match self.bill_one(account_id, model, override_amount).await {
                Ok(attempt) if attempt.status == AttemptStatus::Error => {
                    tally.failed += 1;
                    breaker.record_failure();
                }
                Ok(attempt) => {
                    tally.submitted += 1;
                    if attempt.status == AttemptStatus::Approved {
                        tally.approved += 1;
                    }
                    breaker.record_success();
                }
                Err(Error::NotEligible(reason)) => {
                    info!(%account_id, %reason, "Skipped by eligibility");
                    tally.skipped += 1;
                }
                Err(err) => {
                    warn!(%account_id, error = %err, "Billing attempt errored");
                    tally.failed += 1;
                }
            }
        }

        info!(
            submitted = tally.submitted,
            approved = tally.approved,
            skipped = tally.skipped,
            failed = tally.failed,
            "Batch complete"
        );
        Ok(tally)
    }

    /// Bill every billable, non-blacklisted candidate of an upload batch
    pub async fn bill_upload(
        &self,
        upload_id: UploadId,
        model: BillingModel,
        override_amount: Option<Decimal>,
    ) -> Result<BatchOutcome> {
        let candidates = self.accounts.candidates_for_upload(upload_id).await?;
        let mut account_ids = Vec::with_capacity(candidates.len());
        let mut blacklisted = 0usize;
        for account in &candidates {
            if self.blacklist.is_blacklisted(account).await {
                info!(account_id = %account.id, "Skipped blacklisted debtor");
                blacklisted += 1;
            } else {
                account_ids.push(account.id);
            }
        }

        let mut tally = self.bill_batch(&account_ids, model, override_amount).await?;
        tally.skipped += blacklisted;
        Ok(tally)
    }

    /// Retry a failed attempt as a fresh submission
    ///
    /// Only a `Declined` or `Error` attempt whose account has returned to
    /// `Pending` is retryable; the retry bills the same amount under the
    /// same model and produces a new attempt row.
    pub async fn retry(&self, attempt_id: AttemptId) -> Result<BillingAttempt> {
        let source = self.attempts.get(attempt_id).await?;
        if !matches!(source.status, AttemptStatus::Declined | AttemptStatus::Error) {
            return Err(Error::NotRetryable {
                id: attempt_id,
                status: source.status,
            });
        }

        let account = self.accounts.get(source.account_id).await?;
        if account.status != AccountStatus::Pending {
            return Err(Error::NotEligible(
                crate::eligibility::RejectReason::LifecycleNotBillable(account.status),
            ));
        }

        let model = match source.profile_id {
            Some(profile_id) => self.profiles.get(profile_id).await?.model,
            None => BillingModel::Legacy,
        };
        self.bill_one(source.account_id, model, Some(source.amount)).await
    }

    async fn view_for(&self, account: &Account, model: BillingModel) -> Result<EligibilityView> {
        let profile = self.profiles.find_by_iban(&account.iban).await?;
        let profile_has_other_pending = match (&profile, model.is_recurring()) {
            (Some(p), true) => {
                self.attempts
                    .has_other_pending_for_profile(p.id, account.id)
                    .await?
            }
            _ => false,
        };
        Ok(EligibilityView {
            has_pending_attempt: self.attempts.has_pending_for_account(account.id).await?,
            profile_has_other_pending,
            has_approved_attempt: self.attempts.has_approved_for_account(account.id).await?,
            profile,
        })
    }

    /// First recurring bill for an IBAN creates its profile
    ///
    /// Non-recurring runs get `None` even when the IBAN carries a profile:
    /// a legacy attempt never writes recurring bookkeeping (cycle lock,
    /// lifetime total), so it must not reference the profile either.
    async fn ensure_profile(
        &self,
        account: &Account,
        model: BillingModel,
        amount: Decimal,
        existing: Option<BillingProfile>,
    ) -> Result<Option<BillingProfile>> {
        if !model.is_recurring() {
            return Ok(None);
        }
        if let Some(profile) = existing {
            return Ok(Some(profile));
        }
        let cycle_days = self
            .config
            .billing
            .cycle_days(model)
            .unwrap_or_default();
        let profile = self
            .profiles
            .create(NewProfile {
                iban: account.iban.clone(),
                model,
                amount,
                cycle_days,
            })
            .await?;
        info!(
            profile_id = %profile.id,
            account_id = %account.id,
            %model,
            cycle_days,
            "Billing profile created"
        );
        Ok(Some(profile))
    }

    fn generate_transaction_id(&self, account_id: AccountId) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TRANSACTION_SUFFIX_LEN)
            .map(char::from)
            .collect::<String>()
            .to_lowercase();
        format!(
            "{}_{}_{}_{}",
            self.config.billing.transaction_id_prefix,
            account_id,
            Utc::now().format("%Y%m%d"),
            suffix
        )
    }
}

/// Reduce a classified gateway outcome to the attempt mutation
///
/// Infrastructure failures (HTTP, network, parse) land as `Error` with the
/// diagnostics preserved; nothing is lost and nothing panics.
pub fn map_outcome(outcome: &GatewayOutcome) -> AttemptOutcome {
    match outcome {
        GatewayOutcome::Success(response) => {
            let status = response
                .status()
                .map(AttemptStatus::from_gateway)
                .unwrap_or(AttemptStatus::Error);
            AttemptOutcome {
                status,
                unique_id: response.unique_id().map(String::from),
                response_payload: Some(response.raw().to_string()),
                error_code: response.code().map(String::from),
                error_message: response.message().map(String::from),
            }
        }
        GatewayOutcome::GatewayError {
            code,
            message,
            response,
            ..
        } => AttemptOutcome {
            status: AttemptStatus::Error,
            unique_id: response.unique_id().map(String::from),
            response_payload: Some(response.raw().to_string()),
            error_code: code.clone(),
            error_message: message.clone(),
        },
        GatewayOutcome::HttpError { status, body } => AttemptOutcome {
            status: AttemptStatus::Error,
            unique_id: None,
            response_payload: Some(snippet(body)),
            error_code: Some(format!("http_{}", status)),
            error_message: Some(format!("HTTP {}", status)),
        },
        GatewayOutcome::NetworkError(err) => AttemptOutcome {
            status: AttemptStatus::Error,
            unique_id: None,
            response_payload: None,
            error_code: Some("network".to_string()),
            error_message: Some(err.clone()),
        },
        GatewayOutcome::ParseError { message, snippet } => AttemptOutcome {
            status: AttemptStatus::Error,
            unique_id: None,
            response_payload: Some(snippet.clone()),
            error_code: Some("parse".to_string()),
            error_message: Some(message.clone()),
        },
    }
}

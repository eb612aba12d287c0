//! Eligibility resolver
//!
//! Pure decision function: given an account, its billing model and a view
//! of its attempt/profile state, may it be charged now, and for how much.
//! Rules short-circuit in a fixed order so the log always names the first
//! failing rule, and the inactive-profile check precedes the cycle lock —
//! a charged-back IBAN is never re-billed even after its lock expires.

use billing_core::types::{Account, AccountStatus, BillingModel, BillingProfile, ValidationStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

/// Why an account may not be billed (the first failing rule)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Bank details not validated
    NotValidated,
    /// Lifecycle state is not billable
    LifecycleNotBillable(AccountStatus),
    /// No IBAN on file
    MissingIban,
    /// Resolved charge amount is not positive
    NonPositiveAmount,
    /// Profile deactivated (e.g. by chargeback); applies to every model
    InactiveProfile,
    /// Cumulative charges reached the lifetime cap
    LifetimeCapReached,
    /// An attempt for this account is already pending
    PendingAttempt,
    /// Cycle lock: the profile may not be billed again yet
    CycleLocked {
        /// When the lock expires
        until: DateTime<Utc>,
    },
    /// Another account is mid-flight on the same profile (same IBAN,
    /// different upload)
    ProfilePendingElsewhere,
    /// Legacy accounts are one-shot; a prior attempt was approved
    AlreadyRecovered,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::NotValidated => write!(f, "account not validated"),
            RejectReason::LifecycleNotBillable(status) => {
                write!(f, "lifecycle status {:?} is not billable", status)
            }
            RejectReason::MissingIban => write!(f, "no IBAN on file"),
            RejectReason::NonPositiveAmount => write!(f, "charge amount not positive"),
            RejectReason::InactiveProfile => write!(f, "billing profile is inactive"),
            RejectReason::LifetimeCapReached => write!(f, "lifetime charge cap reached"),
            RejectReason::PendingAttempt => write!(f, "an attempt is already pending"),
            RejectReason::CycleLocked { until } => write!(f, "cycle locked until {}", until),
            RejectReason::ProfilePendingElsewhere => {
                write!(f, "another pending attempt exists on the same profile")
            }
            RejectReason::AlreadyRecovered => write!(f, "legacy account already recovered"),
        }
    }
}

/// Eligibility decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    /// May be billed now for this amount
    Eligible {
        /// Resolved charge amount
        amount: Decimal,
    },
    /// May not be billed; the first failing rule
    Rejected(RejectReason),
}

impl Eligibility {
    /// True for `Eligible`
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible { .. })
    }
}

/// Snapshot of the state the rules read
#[derive(Debug, Clone, Default)]
pub struct EligibilityView {
    /// The IBAN's billing profile, if one exists
    pub profile: Option<BillingProfile>,
    /// Any attempt for this account currently pending?
    pub has_pending_attempt: bool,
    /// Any pending attempt on the same profile from a different account?
    pub profile_has_other_pending: bool,
    /// Any prior approved attempt for this account?
    pub has_approved_attempt: bool,
}

/// Decide whether the account may be billed now
///
/// Pure aside from logging. `override_amount` takes precedence over the
/// profile's configured amount (recurring) and the account's on-file
/// amount (legacy).
pub fn check(
    account: &Account,
    model: BillingModel,
    override_amount: Option<Decimal>,
    view: &EligibilityView,
    lifetime_cap: Decimal,
    now: DateTime<Utc>,
) -> Eligibility {
    let reject = |reason: RejectReason| {
        debug!(account_id = %account.id, %model, %reason, "Billing rejected");
        Eligibility::Rejected(reason)
    };

    // 1. Validation and lifecycle gates
    if account.validation_status != ValidationStatus::Valid {
        return reject(RejectReason::NotValidated);
    }
    if !account.status.is_billable() {
        return reject(RejectReason::LifecycleNotBillable(account.status));
    }

    // 2. Bank details present
    if account.iban.is_empty() {
        return reject(RejectReason::MissingIban);
    }

    // 3. Resolve the charge amount; the profile's configured amount only
    //    applies to recurring models, legacy always bills the on-file amount
    let profile_amount = view
        .profile
        .as_ref()
        .filter(|_| model.is_recurring())
        .map(|p| p.amount);
    let amount = override_amount.or(profile_amount).unwrap_or(account.amount);
    if amount <= Decimal::ZERO {
        return reject(RejectReason::NonPositiveAmount);
    }

    // 4. Inactive profile rejects unconditionally, before any cycle logic
    if let Some(profile) = &view.profile {
        if !profile.is_active {
            return reject(RejectReason::InactiveProfile);
        }
    }

    // 5. Lifetime cap (non-legacy only)
    if model.is_recurring() {
        if let Some(profile) = &view.profile {
            if profile.lifetime_charged_amount >= lifetime_cap {
                return reject(RejectReason::LifetimeCapReached);
            }
        }
    }

    // 6. Single pending attempt per account
    if view.has_pending_attempt {
        return reject(RejectReason::PendingAttempt);
    }

    // 7. Cycle lock and cross-upload guard (non-legacy only)
    if model.is_recurring() {
        if let Some(profile) = &view.profile {
            if let Some(next_bill_at) = profile.next_bill_at {
                if next_bill_at > now {
                    return reject(RejectReason::CycleLocked { until: next_bill_at });
                }
            }
        }
        if view.profile_has_other_pending {
            return reject(RejectReason::ProfilePendingElsewhere);
        }
    }

    // 8. Legacy one-shot
    if !model.is_recurring() && view.has_approved_attempt {
        return reject(RejectReason::AlreadyRecovered);
    }

    Eligibility::Eligible { amount }
}

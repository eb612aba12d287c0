//! Core types for the billing engine

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use uuid::Uuid;

/// Account (debtor) identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(Uuid);

impl AccountId {
    /// Generate a new random account id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing uuid
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Underlying uuid
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Upload batch identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadId(Uuid);

impl UploadId {
    /// Generate a new random upload id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Billing profile identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileId(Uuid);

impl ProfileId {
    /// Generate a new random profile id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProfileId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProfileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Billing attempt identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId(Uuid);

impl AttemptId {
    /// Generate a new random attempt id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// International Bank Account Number
///
/// Normalized on construction: whitespace removed, uppercased. Checksum
/// validation happens upstream (account validation), not here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Iban(String);

impl Iban {
    /// Create a normalized IBAN
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(
            raw.as_ref()
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_uppercase(),
        )
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when no account number is on file
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// ISO 3166 country code derived from the first two characters
    pub fn country(&self) -> String {
        self.0.chars().take(2).collect::<String>().to_uppercase()
    }

    /// SHA-1 hex fingerprint of the normalized IBAN (blacklist key)
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(self.0.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl std::fmt::Display for Iban {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bank Identifier Code (BIC/SWIFT)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bic(String);

impl Bic {
    /// Create a normalized BIC
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_uppercase())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Bic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of upstream bank-account validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Bank details verified
    Valid,
    /// Bank details failed verification
    Invalid,
    /// Not yet verified
    Unknown,
}

/// Account lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// Freshly ingested, never billed
    Uploaded,
    /// Eligible for (re-)billing
    Pending,
    /// A gateway submission is in flight
    Billing,
    /// An attempt was approved
    Recovered,
    /// Given up
    Failed,
    /// A chargeback was received
    Chargebacked,
}

impl AccountStatus {
    /// True for the pre-billing states an eligible account may be in
    pub fn is_billable(&self) -> bool {
        matches!(self, AccountStatus::Uploaded | AccountStatus::Pending)
    }
}

/// Account (debtor) record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Account id
    pub id: AccountId,

    /// Owning upload batch
    pub upload_id: UploadId,

    /// First name
    pub first_name: String,

    /// Last name
    pub last_name: String,

    /// Email address
    pub email: Option<String>,

    /// IBAN
    pub iban: Iban,

    /// Optional BIC
    pub bic: Option<Bic>,

    /// Outstanding amount on file
    pub amount: Decimal,

    /// Upstream validation result
    pub validation_status: ValidationStatus,

    /// Lifecycle status
    pub status: AccountStatus,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

/// Billing model an IBAN participates in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingModel {
    /// One-shot historical model, no profile required
    Legacy,
    /// Recurring 30-day cycle
    Flywheel,
    /// Recurring 90-day cycle
    Recovery,
}

impl BillingModel {
    /// True for models that bill on a cycle against a profile
    pub fn is_recurring(&self) -> bool {
        !matches!(self, BillingModel::Legacy)
    }

    /// Default cycle length in days (None for legacy)
    pub fn cycle_days(&self) -> Option<i64> {
        match self {
            BillingModel::Legacy => None,
            BillingModel::Flywheel => Some(30),
            BillingModel::Recovery => Some(90),
        }
    }
}

impl std::fmt::Display for BillingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BillingModel::Legacy => write!(f, "legacy"),
            BillingModel::Flywheel => write!(f, "flywheel"),
            BillingModel::Recovery => write!(f, "recovery"),
        }
    }
}

/// Per-IBAN recurring billing profile
///
/// Created lazily on the first recurring bill, deactivated by chargeback,
/// never deleted. An IBAN may hold at most one active non-legacy profile;
/// [`crate::store::ProfileRepo::create`] enforces this, not the storage
/// schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingProfile {
    /// Profile id
    pub id: ProfileId,

    /// IBAN the profile is keyed by
    pub iban: Iban,

    /// Billing model
    pub model: BillingModel,

    /// Configured charge amount per cycle
    pub amount: Decimal,

    /// Cycle length in days
    pub cycle_days: i64,

    /// Cycle lock: next time this IBAN may be billed
    pub next_bill_at: Option<DateTime<Utc>>,

    /// Cumulative amount charged across all cycles
    pub lifetime_charged_amount: Decimal,

    /// False once deactivated (e.g. by chargeback)
    pub is_active: bool,

    /// Last approved charge
    pub last_success_at: Option<DateTime<Utc>>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

/// Billing attempt status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Submitted, awaiting outcome
    Pending,
    /// Charge approved
    Approved,
    /// Charge declined by the bank
    Declined,
    /// Gateway or transport error
    Error,
    /// Voided before settlement
    Voided,
    /// Charged back after settlement
    Chargebacked,
}

impl AttemptStatus {
    /// Map a gateway status string to the local status
    ///
    /// Unrecognized values map to `Error` so an unexpected gateway state
    /// never leaves an attempt stuck in `Pending`.
    pub fn from_gateway(status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "approved" => AttemptStatus::Approved,
            "declined" => AttemptStatus::Declined,
            "voided" => AttemptStatus::Voided,
            "chargebacked" | "chargeback" => AttemptStatus::Chargebacked,
            "pending" | "pending_async" => AttemptStatus::Pending,
            "error" => AttemptStatus::Error,
            _ => AttemptStatus::Error,
        }
    }

    /// True for states no further gateway outcome can change
    /// (`Chargebacked` is reachable from any terminal state, one-way)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptStatus::Pending)
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::Approved => "approved",
            AttemptStatus::Declined => "declined",
            AttemptStatus::Error => "error",
            AttemptStatus::Voided => "voided",
            AttemptStatus::Chargebacked => "chargebacked",
        };
        write!(f, "{}", s)
    }
}

/// One gateway submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingAttempt {
    /// Attempt id
    pub id: AttemptId,

    /// Account billed
    pub account_id: AccountId,

    /// Profile the attempt was billed under (recurring models only)
    pub profile_id: Option<ProfileId>,

    /// Locally generated transaction id, immutable once set
    pub transaction_id: String,

    /// Gateway-assigned id, set only on response
    pub unique_id: Option<String>,

    /// Monotonic per account
    pub attempt_number: u32,

    /// Charged amount
    pub amount: Decimal,

    /// Cycle anchor at submission time (recurring models)
    pub cycle_anchor: Option<DateTime<Utc>>,

    /// Attempt status
    pub status: AttemptStatus,

    /// Gateway error code, if any
    pub error_code: Option<String>,

    /// Gateway error message, if any
    pub error_message: Option<String>,

    /// Fully-rendered request document (audit/replay)
    pub request_payload: Option<String>,

    /// Raw response body
    pub response_payload: Option<String>,

    /// Chargeback reason code (e.g. AC04)
    pub chargeback_reason_code: Option<String>,

    /// Chargeback reason description
    pub chargeback_reason_description: Option<String>,

    /// When the chargeback was posted
    pub chargebacked_at: Option<DateTime<Utc>>,

    /// Side-channel metadata blob
    pub metadata: serde_json::Value,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

/// Composite webhook idempotency key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WebhookKey {
    /// Notification provider (the gateway name)
    pub provider: String,

    /// Gateway-assigned transaction id
    pub unique_id: String,

    /// Event type as delivered
    pub event_type: String,
}

impl WebhookKey {
    /// Build a key
    pub fn new(
        provider: impl Into<String>,
        unique_id: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            unique_id: unique_id.into(),
            event_type: event_type.into(),
        }
    }
}

impl std::fmt::Display for WebhookKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.provider, self.unique_id, self.event_type)
    }
}

/// Webhook event processing state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookState {
    /// Recorded on receipt
    Received,
    /// Handed to the job queue
    Queued,
    /// Business effect applied
    Completed,
    /// Retries exhausted, needs manual reconciliation
    Failed,
}

/// Webhook event record (audit trail; never deleted)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Event record id
    pub id: Uuid,

    /// Idempotency key
    pub key: WebhookKey,

    /// Raw payload as delivered
    pub payload: String,

    /// Whether the signature verified
    pub signature_valid: bool,

    /// Processing state
    pub state: WebhookState,

    /// Processing outcome message
    pub message: Option<String>,

    /// Receipt timestamp
    pub received_at: DateTime<Utc>,

    /// Processing completion timestamp
    pub processed_at: Option<DateTime<Utc>>,
}

/// Blacklist entry key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlacklistKey {
    /// SHA-1 fingerprint of a normalized IBAN
    IbanHash(String),
    /// Normalized full name
    Name(String),
    /// Lowercased email
    Email(String),
}

/// Blacklist entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistEntry {
    /// Entry key
    pub key: BlacklistKey,

    /// Human-readable reason (embeds the chargeback code when auto-added)
    pub reason: String,

    /// Who or what added the entry
    pub source: String,

    /// Added timestamp
    pub added_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iban_normalization_and_country() {
        let iban = Iban::new(" de89 3704 0044 0532 0130 00 ");
        assert_eq!(iban.as_str(), "DE89370400440532013000");
        assert_eq!(iban.country(), "DE");
        assert!(!iban.is_empty());
    }

    #[test]
    fn test_iban_fingerprint_is_stable() {
        let a = Iban::new("DE89370400440532013000");
        let b = Iban::new("de89 3704 0044 0532 0130 00");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 40);
    }

    #[test]
    fn test_attempt_status_mapping() {
        assert_eq!(AttemptStatus::from_gateway("approved"), AttemptStatus::Approved);
        assert_eq!(AttemptStatus::from_gateway("DECLINED"), AttemptStatus::Declined);
        assert_eq!(AttemptStatus::from_gateway("pending_async"), AttemptStatus::Pending);
        assert_eq!(AttemptStatus::from_gateway("chargeback"), AttemptStatus::Chargebacked);
        // Unrecognized statuses must land in Error, never stay Pending
        assert_eq!(AttemptStatus::from_gateway("weird_new_state"), AttemptStatus::Error);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!AttemptStatus::Pending.is_terminal());
        for s in [
            AttemptStatus::Approved,
            AttemptStatus::Declined,
            AttemptStatus::Error,
            AttemptStatus::Voided,
            AttemptStatus::Chargebacked,
        ] {
            assert!(s.is_terminal());
        }
    }

    #[test]
    fn test_model_cycles() {
        assert_eq!(BillingModel::Legacy.cycle_days(), None);
        assert_eq!(BillingModel::Flywheel.cycle_days(), Some(30));
        assert_eq!(BillingModel::Recovery.cycle_days(), Some(90));
        assert!(!BillingModel::Legacy.is_recurring());
        assert!(BillingModel::Flywheel.is_recurring());
    }
}

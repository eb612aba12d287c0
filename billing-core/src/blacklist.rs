//! Blacklist guard
//!
//! Append/lookup only from this subsystem's perspective. The webhook
//! processor adds debtors on qualifying chargeback codes; the upstream
//! eligibility pipeline consults it before accounts ever reach the
//! dispatcher.

use crate::types::{Account, BlacklistEntry, BlacklistKey};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::info;

/// Blacklist lookup and registration
#[async_trait]
pub trait BlacklistGuard: Send + Sync {
    /// Is any of the account's identifiers (IBAN hash, name, email)
    /// blacklisted?
    async fn is_blacklisted(&self, account: &Account) -> bool;

    /// Add the account's identifiers to the blacklist
    async fn add_debtor(&self, account: &Account, reason: String, source: String);

    /// All entries (manual review/audit)
    async fn entries(&self) -> Vec<BlacklistEntry>;
}

fn normalize_name(first: &str, last: &str) -> String {
    format!("{} {}", first.trim(), last.trim())
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// In-memory blacklist keyed by identifier
#[derive(Debug, Default)]
pub struct InMemoryBlacklist {
    entries: DashMap<BlacklistKey, BlacklistEntry>,
}

impl InMemoryBlacklist {
    /// Create an empty blacklist
    pub fn new() -> Self {
        Self::default()
    }

    fn keys_for(account: &Account) -> Vec<BlacklistKey> {
        let mut keys = vec![
            BlacklistKey::IbanHash(account.iban.fingerprint()),
            BlacklistKey::Name(normalize_name(&account.first_name, &account.last_name)),
        ];
        if let Some(email) = &account.email {
            keys.push(BlacklistKey::Email(email.trim().to_lowercase()));
        }
        keys
    }
}

#[async_trait]
impl BlacklistGuard for InMemoryBlacklist {
    async fn is_blacklisted(&self, account: &Account) -> bool {
        Self::keys_for(account)
            .iter()
            .any(|key| self.entries.contains_key(key))
    }

    async fn add_debtor(&self, account: &Account, reason: String, source: String) {
        let added_at = Utc::now();
        for key in Self::keys_for(account) {
            // First write wins; entries are append-only
            self.entries.entry(key.clone()).or_insert_with(|| BlacklistEntry {
                key,
                reason: reason.clone(),
                source: source.clone(),
                added_at,
            });
        }
        info!(
            account_id = %account.id,
            %reason,
            "Debtor added to blacklist"
        );
    }

    async fn entries(&self) -> Vec<BlacklistEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }
}

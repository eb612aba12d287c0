//! Configuration for the billing engine
//!
//! A single immutable [`EngineConfig`] is constructed once at process start
//! and injected everywhere; components never read configuration ad hoc.
//! Missing gateway credentials or a missing webhook secret are fatal at
//! startup (`validate`), never discovered per-request.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Gateway connection configuration
    pub gateway: GatewayConfig,

    /// Billing/dispatch configuration
    pub billing: BillingConfig,

    /// Webhook ingestion/processing configuration
    pub webhook: WebhookConfig,

    /// Reconciliation sweeper configuration
    pub reconciliation: ReconciliationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            service_name: "billing-engine".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            gateway: GatewayConfig::default(),
            billing: BillingConfig::default(),
            webhook: WebhookConfig::default(),
            reconciliation: ReconciliationConfig::default(),
        }
    }
}

/// Gateway connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway API endpoint
    pub endpoint: String,

    /// Basic auth username
    pub username: String,

    /// Basic auth password
    pub password: String,

    /// URL the gateway posts notifications to
    pub notification_url: String,

    /// Connect timeout (seconds)
    pub connect_timeout_secs: u64,

    /// Total request timeout (seconds)
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            username: String::new(),
            password: String::new(),
            notification_url: String::new(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

/// Billing/dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Prefix for generated transaction ids
    pub transaction_id_prefix: String,

    /// ISO 4217 currency charges are denominated in
    pub currency: String,

    /// Statement descriptor sent with every charge
    pub statement_usage: String,

    /// Outbound requests per second during batch billing
    pub requests_per_second: u32,

    /// Lifetime charge cap for non-legacy models (currency units)
    pub lifetime_cap: Decimal,

    /// Consecutive failures before the batch circuit breaker opens
    pub circuit_breaker_threshold: u32,

    /// Circuit breaker cooldown (seconds)
    pub circuit_breaker_cooldown_secs: u64,

    /// Override for the flywheel cycle length (days)
    pub flywheel_cycle_days: Option<i64>,

    /// Override for the recovery cycle length (days)
    pub recovery_cycle_days: Option<i64>,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            transaction_id_prefix: "rcp".to_string(),
            currency: "EUR".to_string(),
            statement_usage: "Debt recovery".to_string(),
            requests_per_second: crate::DEFAULT_REQUESTS_PER_SECOND,
            lifetime_cap: Decimal::from(crate::DEFAULT_LIFETIME_CAP),
            circuit_breaker_threshold: crate::DEFAULT_CB_FAILURE_THRESHOLD,
            circuit_breaker_cooldown_secs: crate::DEFAULT_CB_COOLDOWN_SECONDS,
            flywheel_cycle_days: None,
            recovery_cycle_days: None,
        }
    }
}

impl BillingConfig {
    /// Cycle length for a model, honoring config overrides
    pub fn cycle_days(&self, model: crate::types::BillingModel) -> Option<i64> {
        match model {
            crate::types::BillingModel::Legacy => None,
            crate::types::BillingModel::Flywheel => {
                self.flywheel_cycle_days.or(model.cycle_days())
            }
            crate::types::BillingModel::Recovery => {
                self.recovery_cycle_days.or(model.cycle_days())
            }
        }
    }
}

/// Webhook configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Shared secret for notification signatures
    pub secret: String,

    /// Provider label used in idempotency keys
    pub provider: String,

    /// Max processing retries before permanent failure
    pub max_job_retries: u32,

    /// Base retry delay (seconds); doubles per attempt
    pub retry_base_delay_secs: u64,

    /// Hard per-job execution timeout (seconds)
    pub job_timeout_secs: u64,

    /// Chargeback reason codes that auto-blacklist the debtor
    pub auto_blacklist_codes: HashSet<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        let auto_blacklist_codes = ["AC04", "AC06", "MD07", "SL01"]
            .into_iter()
            .map(String::from)
            .collect();

        Self {
            secret: String::new(),
            provider: "gateway".to_string(),
            max_job_retries: 3,
            retry_base_delay_secs: 2,
            job_timeout_secs: 60,
            auto_blacklist_codes,
        }
    }
}

/// Reconciliation sweeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Records per page the gateway returns on by-date queries
    ///
    /// The gateway fixes this server-side; the by-date request carries only
    /// the page number. Kept so operators can size page-delay throttling
    /// against the expected page volume.
    pub page_size: u32,

    /// Delay between pages (milliseconds)
    pub page_delay_ms: u64,

    /// Traverse and count without mutating state
    pub dry_run: bool,

    /// Age after which a pending attempt is considered stale (hours)
    pub stale_pending_hours: i64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            page_size: crate::DEFAULT_RECON_PAGE_SIZE,
            page_delay_ms: 500,
            dry_run: false,
            stale_pending_hours: 24,
        }
    }
}

impl EngineConfig {
    /// Load from a toml file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables, starting from defaults
    pub fn from_env() -> crate::Result<Self> {
        let mut config = EngineConfig::default();

        if let Ok(endpoint) = std::env::var("BILLING_GATEWAY_ENDPOINT") {
            config.gateway.endpoint = endpoint;
        }
        if let Ok(username) = std::env::var("BILLING_GATEWAY_USERNAME") {
            config.gateway.username = username;
        }
        if let Ok(password) = std::env::var("BILLING_GATEWAY_PASSWORD") {
            config.gateway.password = password;
        }
        if let Ok(url) = std::env::var("BILLING_NOTIFICATION_URL") {
            config.gateway.notification_url = url;
        }
        if let Ok(secret) = std::env::var("BILLING_WEBHOOK_SECRET") {
            config.webhook.secret = secret;
        }
        if let Ok(rps) = std::env::var("BILLING_REQUESTS_PER_SECOND") {
            config.billing.requests_per_second = rps
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid requests per second: {}", e)))?;
        }

        Ok(config)
    }

    /// Fail fast on an unusable configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.gateway.endpoint.is_empty() {
            return Err(crate::Error::Config("gateway endpoint is not set".into()));
        }
        if self.gateway.username.is_empty() || self.gateway.password.is_empty() {
            return Err(crate::Error::Config("gateway credentials are not set".into()));
        }
        if self.webhook.secret.is_empty() {
            return Err(crate::Error::Config("webhook secret is not set".into()));
        }
        if self.billing.requests_per_second == 0 {
            return Err(crate::Error::Config("requests_per_second must be > 0".into()));
        }
        if self.billing.lifetime_cap <= Decimal::ZERO {
            return Err(crate::Error::Config("lifetime_cap must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BillingModel;

    fn usable() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.gateway.endpoint = "https://gw.test/process".to_string();
        config.gateway.username = "api".to_string();
        config.gateway.password = "secret".to_string();
        config.webhook.secret = "whsec".to_string();
        config
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.billing.requests_per_second, 50);
        assert_eq!(config.billing.circuit_breaker_threshold, 10);
        assert_eq!(config.billing.circuit_breaker_cooldown_secs, 300);
        assert_eq!(config.gateway.connect_timeout_secs, 10);
        assert_eq!(config.gateway.request_timeout_secs, 30);
        assert!(config.webhook.auto_blacklist_codes.contains("AC04"));
    }

    #[test]
    fn test_validate_rejects_missing_credentials() {
        let config = EngineConfig::default();
        assert!(config.validate().is_err());
        assert!(usable().validate().is_ok());
    }

    #[test]
    fn test_cycle_day_overrides() {
        let mut config = usable();
        assert_eq!(config.billing.cycle_days(BillingModel::Flywheel), Some(30));
        config.billing.recovery_cycle_days = Some(180);
        assert_eq!(config.billing.cycle_days(BillingModel::Recovery), Some(180));
        assert_eq!(config.billing.cycle_days(BillingModel::Legacy), None);
    }
}

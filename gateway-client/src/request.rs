//! Gateway request documents
//!
//! The gateway consumes a fixed-schema XML body per operation. Amounts
//! travel as integer minor units (round-half-up, × 100); billing-address
//! names are truncated and sanitized to the SEPA-safe charset; the country
//! is derived from the IBAN prefix.

use crate::error::{Error, Result};
use billing_core::types::{Bic, Iban};
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// A direct-debit submission, as the dispatcher hands it over
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebitRequest {
    /// Locally generated transaction id
    pub transaction_id: String,

    /// Charge amount (currency units)
    pub amount: Decimal,

    /// ISO 4217 currency code
    pub currency: String,

    /// Statement descriptor / usage line
    pub usage: String,

    /// Debtor IBAN
    pub iban: Iban,

    /// Debtor BIC, if on file
    pub bic: Option<Bic>,

    /// Debtor first name
    pub first_name: String,

    /// Debtor last name
    pub last_name: String,

    /// URL the gateway posts the asynchronous notification to
    pub notification_url: String,
}

/// Convert a decimal amount to integer minor units (round-half-up, × 100)
pub fn minor_units(amount: Decimal) -> Result<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| Error::InvalidAmount(format!("{} out of range", amount)))
}

/// Strip everything outside the SEPA-safe charset and cap the length
///
/// Allowed: letters, digits, space, hyphen, apostrophe, period.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '\'' | '.'))
        .take(crate::SEPA_NAME_MAX_CHARS)
        .collect::<String>()
        .trim()
        .to_string()
}

#[derive(Debug, Serialize)]
#[serde(rename = "payment_transaction")]
struct PaymentTransactionDocument {
    transaction_type: String,
    transaction_id: String,
    usage: String,
    amount: i64,
    currency: String,
    notification_url: String,
    iban: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    bic: Option<String>,
    billing_address: BillingAddress,
}

#[derive(Debug, Serialize)]
struct BillingAddress {
    first_name: String,
    last_name: String,
    country: String,
}

#[derive(Debug, Serialize)]
#[serde(rename = "reconcile")]
struct ReconcileDocument {
    unique_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename = "chargeback_request")]
struct ChargebackByDateDocument {
    start_date: String,
    end_date: String,
    page: u32,
}

fn render<T: Serialize>(document: &T) -> Result<String> {
    let xml = quick_xml::se::to_string(document)
        .map_err(|e| Error::RequestSerialization(e.to_string()))?;
    Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", xml))
}

/// Render the direct-debit submission document
pub fn build_debit(request: &DebitRequest) -> Result<String> {
    let document = PaymentTransactionDocument {
        transaction_type: "sdd_sale".to_string(),
        transaction_id: request.transaction_id.clone(),
        usage: request.usage.clone(),
        amount: minor_units(request.amount)?,
        currency: request.currency.clone(),
        notification_url: request.notification_url.clone(),
        iban: request.iban.as_str().to_string(),
        bic: request.bic.as_ref().map(|b| b.as_str().to_string()),
        billing_address: BillingAddress {
            first_name: sanitize_name(&request.first_name),
            last_name: sanitize_name(&request.last_name),
            country: request.iban.country(),
        },
    };
    render(&document)
}

/// Render the single-transaction reconciliation document
pub fn build_reconcile(unique_id: &str) -> Result<String> {
    render(&ReconcileDocument {
        unique_id: unique_id.to_string(),
    })
}

/// Render the by-date chargeback listing document
pub fn build_by_date(start: NaiveDate, end: NaiveDate, page: u32) -> Result<String> {
    render(&ChargebackByDateDocument {
        start_date: start.format("%Y-%m-%d").to_string(),
        end_date: end.format("%Y-%m-%d").to_string(),
        page,
    })
}

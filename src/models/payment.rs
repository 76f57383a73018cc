use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::subscription::{Identity, PlanId, Subscription};

/// Gateway-reported state of a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentStatus {
    Succeeded,
    Canceled,
    Other(String),
}

impl PaymentStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "succeeded" => PaymentStatus::Succeeded,
            "canceled" => PaymentStatus::Canceled,
            other => PaymentStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Canceled => "canceled",
            PaymentStatus::Other(raw) => raw,
        }
    }
}

/// A validated payment notification.
#[derive(Debug, Clone)]
pub struct PaymentEvent {
    /// Provider-assigned id; the idempotence key.
    pub payment_id: String,
    pub identity: Identity,
    pub plan: PlanId,
    /// Amount in minor currency units. Only succeeded payments must carry one.
    pub amount: Option<i64>,
    pub currency: String,
    pub status: PaymentStatus,
    pub received_at: DateTime<Utc>,
}

/// Result of applying a succeeded payment to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// First delivery: the payment was recorded and the grant applied.
    Granted(Subscription),
    /// The payment id was already processed; nothing changed.
    AlreadyProcessed,
}

/// The `event` field of a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    PaymentSucceeded,
    PaymentCanceled,
    Unrecognized(String),
}

impl WebhookEvent {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "payment.succeeded" => WebhookEvent::PaymentSucceeded,
            "payment.canceled" => WebhookEvent::PaymentCanceled,
            other => WebhookEvent::Unrecognized(other.to_string()),
        }
    }
}

/// Raw notification body as posted by the gateway.
#[derive(Debug, Deserialize)]
pub struct WebhookNotification {
    pub event: Option<String>,
    #[serde(default)]
    pub object: Option<WebhookObject>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookObject {
    pub id: Option<String>,
    pub status: Option<String>,
    pub amount: Option<WebhookAmount>,
    #[serde(default)]
    pub metadata: Option<WebhookMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookAmount {
    pub value: AmountValue,
    pub currency: Option<String>,
}

/// Gateways send amounts as decimal strings, some test tools as numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AmountValue {
    Text(String),
    Number(f64),
}

impl AmountValue {
    /// Converts the amount to minor units without going through floats for strings.
    pub fn to_minor_units(&self) -> Option<i64> {
        match self {
            AmountValue::Text(raw) => parse_decimal_minor(raw),
            AmountValue::Number(value) if value.is_finite() && *value >= 0.0 => {
                Some((value * 100.0).round() as i64)
            }
            AmountValue::Number(_) => None,
        }
    }
}

fn parse_decimal_minor(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let (whole, fraction) = match raw.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (raw, ""),
    };
    if whole.is_empty() || fraction.len() > 2 {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let whole: i64 = whole.parse().ok()?;
    let cents: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().ok()? * 10,
        _ => fraction.parse().ok()?,
    };
    whole.checked_mul(100)?.checked_add(cents)
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookMetadata {
    #[serde(alias = "user_id")]
    pub identity: Option<IdentityValue>,
    #[serde(alias = "plan_type")]
    pub plan: Option<String>,
}

/// Metadata values round-trip through the gateway as strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum IdentityValue {
    Number(i64),
    Text(String),
}

impl IdentityValue {
    pub fn to_identity(&self) -> Option<Identity> {
        match self {
            IdentityValue::Number(id) => Some(*id),
            IdentityValue::Text(raw) => raw.trim().parse().ok(),
        }
    }
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::CheckoutConfig,
    error::{AppError, Result},
    models::subscription::{Identity, Plan},
};

/// Creates hosted payments for plan purchases.
#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    /// Creates a payment and returns the URL the payer must open.
    async fn create_payment(&self, identity: Identity, plan: &Plan, currency: &str) -> Result<String>;
}

#[derive(Serialize)]
struct PaymentRequest<'a> {
    amount: Amount<'a>,
    confirmation: ConfirmationRequest<'a>,
    capture: bool,
    description: String,
    metadata: PaymentMetadata<'a>,
}

#[derive(Serialize)]
struct Amount<'a> {
    value: String,
    currency: &'a str,
}

#[derive(Serialize)]
struct ConfirmationRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    return_url: &'a str,
}

/// Echoed back in the webhook; the reconciler reads these two keys.
#[derive(Serialize)]
struct PaymentMetadata<'a> {
    user_id: String,
    plan_type: &'a str,
}

#[derive(Deserialize)]
struct PaymentResponse {
    id: String,
    #[serde(default)]
    confirmation: Option<ConfirmationResponse>,
}

#[derive(Deserialize)]
struct ConfirmationResponse {
    confirmation_url: Option<String>,
}

/// YooKassa-style checkout over HTTP basic auth.
pub struct YooKassaCheckout {
    client: reqwest::Client,
    config: CheckoutConfig,
}

impl YooKassaCheckout {
    pub fn new(config: CheckoutConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl CheckoutProvider for YooKassaCheckout {
    async fn create_payment(&self, identity: Identity, plan: &Plan, currency: &str) -> Result<String> {
        let request = PaymentRequest {
            amount: Amount {
                value: format!("{}.00", plan.price),
                currency,
            },
            confirmation: ConfirmationRequest {
                kind: "redirect",
                return_url: &self.config.return_url,
            },
            capture: true,
            description: format!("Subscription: {}", plan.display_name),
            metadata: PaymentMetadata {
                user_id: identity.to_string(),
                plan_type: plan.id.as_str(),
            },
        };
        let body = sonic_rs::to_string(&request)?;

        let response = self
            .client
            .post(format!("{}/payments", self.config.base_url.trim_end_matches('/')))
            .basic_auth(&self.config.shop_id, Some(self.config.secret_key.as_str()))
            .header("Idempotence-Key", Uuid::new_v4().to_string())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AppError::Checkout(format!("gateway answered {}: {}", status, text)));
        }

        let payment: PaymentResponse = sonic_rs::from_str(&text)?;
        let url = payment
            .confirmation
            .and_then(|confirmation| confirmation.confirmation_url)
            .ok_or_else(|| AppError::Checkout(format!("payment {} has no confirmation URL", payment.id)))?;

        tracing::info!("💳 Created payment {} for {} ({})", payment.id, identity, plan.id);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::subscription::{PlanCatalog, PlanId};

    #[test]
    fn request_carries_reconciler_metadata() {
        let catalog = PlanCatalog::default();
        let plan = catalog.get(PlanId::ThreeMonths).unwrap();
        let request = PaymentRequest {
            amount: Amount {
                value: format!("{}.00", plan.price),
                currency: "RUB",
            },
            confirmation: ConfirmationRequest {
                kind: "redirect",
                return_url: "https://t.me",
            },
            capture: true,
            description: "x".to_string(),
            metadata: PaymentMetadata {
                user_id: "42".to_string(),
                plan_type: plan.id.as_str(),
            },
        };

        let json = sonic_rs::to_string(&request).unwrap();
        assert!(json.contains(r#""value":"1499.00""#));
        assert!(json.contains(r#""type":"redirect""#));
        assert!(json.contains(r#""user_id":"42""#));
        assert!(json.contains(r#""plan_type":"3_months""#));
    }
}

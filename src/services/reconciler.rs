use chrono::Utc;
use std::sync::Arc;
use crate::{
    error::{AppError, Result},
    models::{
        payment::{PaymentEvent, PaymentStatus, Settlement, WebhookEvent, WebhookNotification},
        subscription::{PlanId, Subscription},
    },
    services::ledger::SubscriptionLedger,
};

/// What a notification did to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// First delivery of a succeeded payment; the plan was granted.
    Granted(Subscription),
    /// The payment id was already processed.
    Duplicate,
    /// Audited without touching entitlement.
    Recorded,
    /// Event type this service does not act on.
    Ignored,
}

/// Turns gateway notifications into ledger mutations.
pub struct PaymentReconciler {
    ledger: Arc<SubscriptionLedger>,
}

impl PaymentReconciler {
    pub fn new(ledger: Arc<SubscriptionLedger>) -> Self {
        Self { ledger }
    }

    /// Applies one raw notification body.
    ///
    /// Malformed payloads fail closed: nothing is written and
    /// `AppError::MalformedWebhook` is returned. Redelivery of a processed
    /// payment is a successful no-op.
    ///
    /// # Arguments
    ///
    /// * `raw` - The notification body as received.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `ReconcileOutcome`.
    pub async fn handle_event(&self, raw: &[u8]) -> Result<ReconcileOutcome> {
        let notification: WebhookNotification = sonic_rs::from_slice(raw)
            .map_err(|e| AppError::MalformedWebhook(format!("unparsable body: {}", e)))?;

        let event = notification
            .event
            .as_deref()
            .map(WebhookEvent::parse)
            .ok_or_else(|| AppError::MalformedWebhook("missing event".to_string()))?;

        if let WebhookEvent::Unrecognized(name) = &event {
            tracing::info!("Ignoring webhook event {}", name);
            return Ok(ReconcileOutcome::Ignored);
        }

        let payment = self.parse_payment(&event, notification)?;
        let plan = self
            .ledger
            .plans()
            .get(payment.plan)
            .cloned()
            .ok_or_else(|| AppError::MalformedWebhook(format!("plan {} is not offered", payment.plan)))?;

        let grants = event == WebhookEvent::PaymentSucceeded && payment.status == PaymentStatus::Succeeded;
        if !grants {
            self.ledger.record_payment(&payment).await?;
            tracing::info!(
                "🧾 Recorded payment {} with status {} for {}",
                payment.payment_id,
                payment.status.as_str(),
                payment.identity
            );
            return Ok(ReconcileOutcome::Recorded);
        }

        let Some(amount) = payment.amount else {
            return Err(AppError::MalformedWebhook(format!(
                "payment {} succeeded without an amount",
                payment.payment_id
            )));
        };

        if amount != plan.price_minor() || payment.currency != self.ledger.plans().currency {
            tracing::warn!(
                "Payment {} paid {} {} for plan {} priced {} {}",
                payment.payment_id,
                amount,
                payment.currency,
                plan.id,
                plan.price_minor(),
                self.ledger.plans().currency
            );
        }

        match self.ledger.settle_payment(&payment, &plan).await? {
            Settlement::Granted(subscription) => {
                tracing::info!(
                    "✅ Payment {} activated {} for {}",
                    payment.payment_id,
                    plan.id,
                    payment.identity
                );
                Ok(ReconcileOutcome::Granted(subscription))
            }
            Settlement::AlreadyProcessed => {
                tracing::info!("Payment {} already processed", payment.payment_id);
                Ok(ReconcileOutcome::Duplicate)
            }
        }
    }

    fn parse_payment(&self, event: &WebhookEvent, notification: WebhookNotification) -> Result<PaymentEvent> {
        let object = notification
            .object
            .ok_or_else(|| AppError::MalformedWebhook("missing object".to_string()))?;

        let payment_id = object
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| AppError::MalformedWebhook("missing payment id".to_string()))?;

        let metadata = object.metadata.unwrap_or_default();
        let identity = metadata
            .identity
            .as_ref()
            .and_then(|value| value.to_identity())
            .ok_or_else(|| AppError::MalformedWebhook(format!("payment {} has no identity", payment_id)))?;

        let plan = metadata
            .plan
            .as_deref()
            .ok_or_else(|| AppError::MalformedWebhook(format!("payment {} has no plan", payment_id)))?
            .parse::<PlanId>()
            .map_err(AppError::MalformedWebhook)?;

        let status = match (object.status.as_deref(), event) {
            (Some(raw), _) => PaymentStatus::parse(raw),
            (None, WebhookEvent::PaymentSucceeded) => PaymentStatus::Succeeded,
            (None, _) => PaymentStatus::Canceled,
        };

        let catalog_currency = || self.ledger.plans().currency.clone();
        let (amount, currency) = match object.amount {
            Some(amount) => (
                Some(amount.value.to_minor_units().ok_or_else(|| {
                    AppError::MalformedWebhook(format!("payment {} has an invalid amount", payment_id))
                })?),
                amount.currency.unwrap_or_else(catalog_currency),
            ),
            None => (None, catalog_currency()),
        };

        Ok(PaymentEvent {
            payment_id,
            identity,
            plan,
            amount,
            currency,
            status,
            received_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::subscription::PlanCatalog;
    use crate::repositories::memory::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, Arc<SubscriptionLedger>, PaymentReconciler) {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(SubscriptionLedger::new(store.clone(), PlanCatalog::default()));
        let reconciler = PaymentReconciler::new(ledger.clone());
        (store, ledger, reconciler)
    }

    fn body(event: &str, status: &str, identity: &str, plan: &str) -> Vec<u8> {
        format!(
            r#"{{"event":"{}","object":{{"id":"pay_1","status":"{}","amount":{{"value":"999.00","currency":"RUB"}},"metadata":{{"user_id":"{}","plan_type":"{}"}}}}}}"#,
            event, status, identity, plan
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn replays_grant_once() {
        let (store, ledger, reconciler) = setup();
        let raw = body("payment.succeeded", "succeeded", "7", "1_month");

        let first = reconciler.handle_event(&raw).await.unwrap();
        assert!(matches!(first, ReconcileOutcome::Granted(_)));
        let granted = ledger.describe(7).await.unwrap();

        for _ in 0..4 {
            assert_eq!(reconciler.handle_event(&raw).await.unwrap(), ReconcileOutcome::Duplicate);
        }

        assert_eq!(store.payments().await.len(), 1);
        assert_eq!(ledger.describe(7).await.unwrap(), granted);
    }

    #[tokio::test]
    async fn unknown_plan_fails_closed() {
        let (store, ledger, reconciler) = setup();
        let raw = body("payment.succeeded", "succeeded", "7", "lifetime");

        let result = reconciler.handle_event(&raw).await;
        assert!(matches!(result, Err(AppError::MalformedWebhook(_))));
        assert!(store.payments().await.is_empty());
        assert!(ledger.describe(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn canceled_payment_is_audited_without_grant() {
        let (store, ledger, reconciler) = setup();
        let raw = body("payment.canceled", "canceled", "7", "1_month");

        assert_eq!(reconciler.handle_event(&raw).await.unwrap(), ReconcileOutcome::Recorded);
        assert_eq!(store.payments().await.len(), 1);
        assert!(ledger.describe(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn canceled_payment_without_amount_is_audited() {
        let (store, ledger, reconciler) = setup();
        let raw = br#"{"event":"payment.canceled","object":{"id":"pay_5","status":"canceled","metadata":{"user_id":"7","plan_type":"1_month"}}}"#;

        assert_eq!(reconciler.handle_event(raw).await.unwrap(), ReconcileOutcome::Recorded);
        let payments = store.payments().await;
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].event.amount, None);
        assert_eq!(payments[0].event.currency, "RUB");
        assert!(ledger.describe(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn succeeded_payment_without_amount_fails_closed() {
        let (store, ledger, reconciler) = setup();
        let raw = br#"{"event":"payment.succeeded","object":{"id":"pay_6","status":"succeeded","metadata":{"user_id":"7","plan_type":"1_month"}}}"#;

        let result = reconciler.handle_event(raw).await;
        assert!(matches!(result, Err(AppError::MalformedWebhook(_))));
        assert!(store.payments().await.is_empty());
        assert!(ledger.describe(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unrecognized_events_are_ignored() {
        let (store, _, reconciler) = setup();
        let raw = br#"{"event":"refund.succeeded","object":{"id":"r_1"}}"#;

        assert_eq!(reconciler.handle_event(raw).await.unwrap(), ReconcileOutcome::Ignored);
        assert!(store.payments().await.is_empty());
    }

    #[tokio::test]
    async fn numeric_metadata_identity_is_accepted() {
        let (_, ledger, reconciler) = setup();
        let raw = br#"{"event":"payment.succeeded","object":{"id":"pay_9","status":"succeeded","amount":{"value":"4999.00","currency":"RUB"},"metadata":{"identity":9,"plan":"1_year"}}}"#;

        assert!(matches!(
            reconciler.handle_event(raw).await.unwrap(),
            ReconcileOutcome::Granted(_)
        ));
        assert_eq!(ledger.describe(9).await.unwrap().map(|s| s.plan), Some(PlanId::OneYear));
    }
}

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use crate::{
    error::{AppError, Result},
    models::{
        generation::GenerationLogEntry,
        payment::{PaymentEvent, Settlement},
        stats::{UsageStats, UserStats},
        subscription::{Identity, Plan, PlanCatalog, PlanId, Subscription, SubscriptionGrant},
    },
    repositories::store::LedgerStore,
};

/// Length of the reporting window of `usage_stats`.
pub const STATS_WINDOW_HOURS: i64 = 24;

/// The single source of truth for entitlement.
///
/// Every storage failure is reported as `AppError::LedgerUnavailable`;
/// callers treat that as "not entitled".
pub struct SubscriptionLedger {
    store: Arc<dyn LedgerStore>,
    plans: PlanCatalog,
}

impl SubscriptionLedger {
    pub fn new(store: Arc<dyn LedgerStore>, plans: PlanCatalog) -> Self {
        Self { store, plans }
    }

    /// The plan catalog shared by checkout and reconciliation.
    pub fn plans(&self) -> &PlanCatalog {
        &self.plans
    }

    /// Checks whether an identity holds a subscription covering `now`.
    ///
    /// An active row whose period is over is flipped to inactive before the
    /// answer is returned.
    ///
    /// # Arguments
    ///
    /// * `identity` - The user to check.
    /// * `now` - The time of the check.
    ///
    /// # Returns
    ///
    /// A `Result` containing whether the identity is entitled.
    pub async fn is_entitled(&self, identity: Identity, now: DateTime<Utc>) -> Result<bool> {
        let subscription = self
            .store
            .find_subscription(identity)
            .await
            .map_err(AppError::into_ledger_error)?;

        match subscription {
            Some(sub) if sub.covers(now) => Ok(true),
            Some(sub) if sub.is_lapsed(now) => {
                self.store
                    .expire_if_lapsed(identity, now)
                    .await
                    .map_err(AppError::into_ledger_error)?;
                tracing::info!("⌛ Subscription of {} expired at {:?}", identity, sub.expires_at);
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    /// Grants a subscription effective immediately.
    pub async fn grant(
        &self,
        identity: Identity,
        plan: PlanId,
        duration: Duration,
        source_reference: impl Into<String>,
    ) -> Result<Subscription> {
        self.grant_at(identity, plan, duration, source_reference, Utc::now()).await
    }

    /// Grants a subscription effective at `now`, superseding any prior row.
    ///
    /// # Arguments
    ///
    /// * `identity` - The beneficiary.
    /// * `plan` - The plan recorded on the row.
    /// * `duration` - Length of the paid period.
    /// * `source_reference` - Payment id or `admin:<reason>`.
    /// * `now` - Start of the period.
    ///
    /// # Returns
    ///
    /// A `Result` containing the new effective `Subscription`.
    pub async fn grant_at(
        &self,
        identity: Identity,
        plan: PlanId,
        duration: Duration,
        source_reference: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        if duration <= Duration::zero() {
            return Err(AppError::Validation("Grant duration must be positive".to_string()));
        }

        let grant = SubscriptionGrant {
            identity,
            plan,
            starts_at: now,
            expires_at: now + duration,
            source_reference: source_reference.into(),
        };

        let subscription = self
            .store
            .apply_grant(&grant)
            .await
            .map_err(AppError::into_ledger_error)?;

        tracing::info!(
            "✅ Granted {} to {} until {} ({})",
            plan,
            identity,
            grant.expires_at,
            grant.source_reference
        );
        Ok(subscription)
    }

    /// Returns the current row of an identity, if any.
    pub async fn describe(&self, identity: Identity) -> Result<Option<Subscription>> {
        self.store
            .find_subscription(identity)
            .await
            .map_err(AppError::into_ledger_error)
    }

    /// Flips every lapsed subscription to inactive.
    ///
    /// Entitlement checks already expire rows lazily; this only keeps the
    /// stored `active` flags accurate for reporting.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        self.store
            .deactivate_expired(now)
            .await
            .map_err(AppError::into_ledger_error)
    }

    /// Records a succeeded payment and grants its plan, at most once per payment id.
    pub async fn settle_payment(&self, event: &PaymentEvent, plan: &Plan) -> Result<Settlement> {
        let grant = SubscriptionGrant {
            identity: event.identity,
            plan: plan.id,
            starts_at: event.received_at,
            expires_at: event.received_at + plan.duration,
            source_reference: event.payment_id.clone(),
        };

        self.store
            .settle_payment(event, &grant)
            .await
            .map_err(AppError::into_ledger_error)
    }

    /// Stores a payment notification that grants nothing.
    pub async fn record_payment(&self, event: &PaymentEvent) -> Result<()> {
        self.store
            .record_payment(event)
            .await
            .map_err(AppError::into_ledger_error)
    }

    /// Appends a finished job to the generation audit log.
    pub async fn log_generation(&self, entry: &GenerationLogEntry) -> Result<()> {
        self.store
            .log_generation(entry)
            .await
            .map_err(AppError::into_ledger_error)
    }

    /// Service-wide counters for the day ending at `now`.
    pub async fn usage_stats(&self, now: DateTime<Utc>) -> Result<UsageStats> {
        self.store
            .usage_stats(now, now - Duration::hours(STATS_WINDOW_HOURS))
            .await
            .map_err(AppError::into_ledger_error)
    }

    pub async fn user_stats(&self, identity: Identity) -> Result<UserStats> {
        self.store
            .user_stats(identity)
            .await
            .map_err(AppError::into_ledger_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory::MemoryStore;

    fn ledger() -> SubscriptionLedger {
        SubscriptionLedger::new(Arc::new(MemoryStore::new()), PlanCatalog::default())
    }

    #[tokio::test]
    async fn entitlement_follows_the_granted_window() {
        let ledger = ledger();
        let t = Utc::now();

        ledger
            .grant_at(7, PlanId::OneMonth, Duration::days(30), "admin:test", t)
            .await
            .unwrap();

        assert!(ledger.is_entitled(7, t + Duration::days(29)).await.unwrap());
        assert!(!ledger.is_entitled(7, t + Duration::days(31)).await.unwrap());

        let sub = ledger.describe(7).await.unwrap().unwrap();
        assert!(!sub.active);
        assert_eq!(sub.expires_at, Some(t + Duration::days(30)));
    }

    #[tokio::test]
    async fn unknown_identity_is_not_entitled() {
        assert!(!ledger().is_entitled(42, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn a_new_grant_supersedes_the_previous_row() {
        let ledger = ledger();
        let t = Utc::now();

        ledger.grant_at(7, PlanId::OneYear, Duration::days(365), "pay_1", t).await.unwrap();
        let sub = ledger
            .grant_at(7, PlanId::OneMonth, Duration::days(30), "admin:downgrade", t)
            .await
            .unwrap();

        assert_eq!(sub.plan, PlanId::OneMonth);
        assert_eq!(ledger.describe(7).await.unwrap(), Some(sub));
    }

    #[tokio::test]
    async fn zero_duration_is_rejected() {
        let result = ledger().grant(7, PlanId::OneMonth, Duration::zero(), "admin:x").await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn sweep_reports_lapsed_rows() {
        let ledger = ledger();
        let t = Utc::now();

        ledger.grant_at(1, PlanId::OneMonth, Duration::days(30), "a", t).await.unwrap();
        ledger.grant_at(2, PlanId::OneYear, Duration::days(365), "b", t).await.unwrap();

        assert_eq!(ledger.sweep_expired(t + Duration::days(31)).await.unwrap(), 1);
        assert!(ledger.is_entitled(2, t + Duration::days(31)).await.unwrap());
    }

    #[tokio::test]
    async fn usage_stats_split_the_reporting_window() {
        use crate::models::generation::JobKind;

        let ledger = ledger();
        let now = Utc::now();
        let entry = |success: bool, ms: i64, age: Duration| GenerationLogEntry {
            identity: 4,
            kind: JobKind::Generate,
            prompt: "a quiet harbor at dawn".to_string(),
            result_reference: None,
            success,
            processing_time_ms: ms,
            created_at: now - age,
        };

        ledger.log_generation(&entry(true, 1000, Duration::hours(30))).await.unwrap();
        ledger.log_generation(&entry(true, 3000, Duration::hours(2))).await.unwrap();
        ledger.log_generation(&entry(false, 5000, Duration::minutes(5))).await.unwrap();
        ledger.grant_at(4, PlanId::OneMonth, Duration::days(30), "a", now).await.unwrap();
        ledger.grant_at(5, PlanId::OneMonth, Duration::days(30), "b", now - Duration::days(40)).await.unwrap();

        let stats = ledger.usage_stats(now).await.unwrap();
        assert_eq!(stats.total_generations, 3);
        assert_eq!(stats.successful_generations, 2);
        assert_eq!(stats.generations_24h, 2);
        assert_eq!(stats.successful_generations_24h, 1);
        assert_eq!(stats.avg_processing_time_ms, 3000.0);
        assert_eq!(stats.active_subscribers, 1);

        let user = ledger.user_stats(4).await.unwrap();
        assert_eq!(user.total_generations, 3);
        assert_eq!(ledger.user_stats(9).await.unwrap().avg_processing_time_ms, 0.0);
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use crate::{
    error::Result,
    models::{
        generation::GenerationLogEntry,
        payment::{PaymentEvent, Settlement},
        stats::{UsageStats, UserStats},
        subscription::{Identity, Subscription, SubscriptionGrant},
    },
    repositories::{
        generation as generation_repo, payment as payment_repo, stats as stats_repo,
        subscription as subscription_repo,
    },
};

/// Durable storage behind the subscription ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn find_subscription(&self, identity: Identity) -> Result<Option<Subscription>>;

    /// Clears the active flag of `identity` when its period ended at or before `now`.
    async fn expire_if_lapsed(&self, identity: Identity, now: DateTime<Utc>) -> Result<bool>;

    /// Clears every lapsed active flag; returns the number of rows changed.
    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    async fn apply_grant(&self, grant: &SubscriptionGrant) -> Result<Subscription>;

    /// Stores a notification that grants nothing.
    async fn record_payment(&self, event: &PaymentEvent) -> Result<()>;

    /// Records a succeeded payment and applies its grant as one unit.
    async fn settle_payment(&self, event: &PaymentEvent, grant: &SubscriptionGrant) -> Result<Settlement>;

    async fn log_generation(&self, entry: &GenerationLogEntry) -> Result<()>;

    /// Service-wide counters; `since` opens the reporting window.
    async fn usage_stats(&self, now: DateTime<Utc>, since: DateTime<Utc>) -> Result<UsageStats>;

    async fn user_stats(&self, identity: Identity) -> Result<UserStats>;
}

/// PostgreSQL-backed store.
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn find_subscription(&self, identity: Identity) -> Result<Option<Subscription>> {
        subscription_repo::find_by_identity(&self.pool, identity).await
    }

    async fn expire_if_lapsed(&self, identity: Identity, now: DateTime<Utc>) -> Result<bool> {
        subscription_repo::expire_if_lapsed(&self.pool, identity, now).await
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        subscription_repo::deactivate_expired(&self.pool, now).await
    }

    async fn apply_grant(&self, grant: &SubscriptionGrant) -> Result<Subscription> {
        subscription_repo::apply_grant(&self.pool, grant).await
    }

    async fn record_payment(&self, event: &PaymentEvent) -> Result<()> {
        payment_repo::record_event(&self.pool, event).await
    }

    async fn settle_payment(&self, event: &PaymentEvent, grant: &SubscriptionGrant) -> Result<Settlement> {
        payment_repo::settle(&self.pool, event, grant).await
    }

    async fn log_generation(&self, entry: &GenerationLogEntry) -> Result<()> {
        generation_repo::insert_entry(&self.pool, entry).await
    }

    async fn usage_stats(&self, now: DateTime<Utc>, since: DateTime<Utc>) -> Result<UsageStats> {
        stats_repo::usage_stats(&self.pool, now, since).await
    }

    async fn user_stats(&self, identity: Identity) -> Result<UserStats> {
        stats_repo::user_stats(&self.pool, identity).await
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use crate::{
    error::Result,
    models::{
        generation::GenerationLogEntry,
        payment::{PaymentEvent, Settlement},
        stats::{UsageStats, UserStats},
        subscription::{Identity, Subscription, SubscriptionGrant},
    },
    repositories::store::LedgerStore,
};

/// A stored payment notification.
#[derive(Debug, Clone)]
pub struct PaymentRecord {
    pub event: PaymentEvent,
    pub processed_at: Option<DateTime<Utc>>,
}

fn average_ms<'a>(entries: impl Iterator<Item = &'a GenerationLogEntry>) -> f64 {
    let (count, total) = entries.fold((0i64, 0i64), |(count, total), entry| {
        (count + 1, total.saturating_add(entry.processing_time_ms))
    });
    if count == 0 { 0.0 } else { total as f64 / count as f64 }
}

#[derive(Default)]
struct Tables {
    subscriptions: HashMap<Identity, Subscription>,
    payments: HashMap<String, PaymentRecord>,
    generations: Vec<GenerationLogEntry>,
}

/// Process-local store used when no database is configured.
///
/// A single lock covers all tables, so settlement is atomic the same way the
/// SQL transaction is.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored payment row.
    pub async fn payments(&self) -> Vec<PaymentRecord> {
        self.tables.lock().await.payments.values().cloned().collect()
    }

    /// The generation audit log, oldest first.
    pub async fn generation_log(&self) -> Vec<GenerationLogEntry> {
        self.tables.lock().await.generations.clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn find_subscription(&self, identity: Identity) -> Result<Option<Subscription>> {
        Ok(self.tables.lock().await.subscriptions.get(&identity).cloned())
    }

    async fn expire_if_lapsed(&self, identity: Identity, now: DateTime<Utc>) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.subscriptions.get_mut(&identity) {
            Some(sub) if sub.is_lapsed(now) => {
                sub.active = false;
                sub.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let mut changed = 0;
        for sub in tables.subscriptions.values_mut().filter(|sub| sub.is_lapsed(now)) {
            sub.active = false;
            sub.updated_at = now;
            changed += 1;
        }
        Ok(changed)
    }

    async fn apply_grant(&self, grant: &SubscriptionGrant) -> Result<Subscription> {
        let subscription = grant.to_subscription();
        self.tables
            .lock()
            .await
            .subscriptions
            .insert(grant.identity, subscription.clone());
        Ok(subscription)
    }

    async fn record_payment(&self, event: &PaymentEvent) -> Result<()> {
        let mut tables = self.tables.lock().await;
        match tables.payments.get_mut(&event.payment_id) {
            Some(record) if record.processed_at.is_none() => {
                record.event.status = event.status.clone();
            }
            Some(_) => {}
            None => {
                tables.payments.insert(
                    event.payment_id.clone(),
                    PaymentRecord { event: event.clone(), processed_at: None },
                );
            }
        }
        Ok(())
    }

    async fn settle_payment(&self, event: &PaymentEvent, grant: &SubscriptionGrant) -> Result<Settlement> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        match tables.payments.get_mut(&event.payment_id) {
            Some(record) if record.processed_at.is_some() => return Ok(Settlement::AlreadyProcessed),
            Some(record) => {
                record.event.status = event.status.clone();
                record.processed_at = Some(now);
            }
            None => {
                tables.payments.insert(
                    event.payment_id.clone(),
                    PaymentRecord { event: event.clone(), processed_at: Some(now) },
                );
            }
        }
        let subscription = grant.to_subscription();
        tables.subscriptions.insert(grant.identity, subscription.clone());
        Ok(Settlement::Granted(subscription))
    }

    async fn log_generation(&self, entry: &GenerationLogEntry) -> Result<()> {
        self.tables.lock().await.generations.push(entry.clone());
        Ok(())
    }

    async fn usage_stats(&self, now: DateTime<Utc>, since: DateTime<Utc>) -> Result<UsageStats> {
        let tables = self.tables.lock().await;
        let generations = &tables.generations;
        let recent = move || generations.iter().filter(move |entry| entry.created_at >= since);
        let processed: Vec<(DateTime<Utc>, i64)> = tables
            .payments
            .values()
            .filter_map(|record| record.processed_at.map(|at| (at, record.event.amount.unwrap_or(0))))
            .collect();

        Ok(UsageStats {
            total_generations: generations.len() as i64,
            successful_generations: generations.iter().filter(|entry| entry.success).count() as i64,
            generations_24h: recent().count() as i64,
            successful_generations_24h: recent().filter(|entry| entry.success).count() as i64,
            avg_processing_time_ms: average_ms(generations.iter()),
            active_subscribers: tables.subscriptions.values().filter(|sub| sub.covers(now)).count() as i64,
            processed_payments: processed.len() as i64,
            total_revenue: processed.iter().map(|(_, amount)| amount).sum(),
            revenue_24h: processed
                .iter()
                .filter(|(at, _)| *at >= since)
                .map(|(_, amount)| amount)
                .sum(),
        })
    }

    async fn user_stats(&self, identity: Identity) -> Result<UserStats> {
        let tables = self.tables.lock().await;
        let generations = &tables.generations;
        let mine = move || generations.iter().filter(move |entry| entry.identity == identity);
        let payments: Vec<&PaymentRecord> = tables
            .payments
            .values()
            .filter(|record| record.event.identity == identity)
            .collect();

        Ok(UserStats {
            identity,
            total_generations: mine().count() as i64,
            successful_generations: mine().filter(|entry| entry.success).count() as i64,
            avg_processing_time_ms: average_ms(mine()),
            total_payments: payments.len() as i64,
            total_paid_amount: payments
                .iter()
                .filter(|record| record.processed_at.is_some())
                .filter_map(|record| record.event.amount)
                .sum(),
        })
    }
}

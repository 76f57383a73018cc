use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use crate::{
    error::{AppError, Result},
    models::{
        stats::{UsageStats, UserStats},
        subscription::Identity,
    },
};

fn column<'a, T: tokio_postgres::types::FromSql<'a>>(row: &'a Row, name: &str) -> Result<T> {
    row.try_get(name).map_err(|_| AppError::MissingData(name.to_string()))
}

/// Aggregates the generation log, subscriptions and processed payments.
///
/// # Arguments
///
/// * `pool` - The database connection pool.
/// * `now` - Subscriptions must cover this instant to count as active.
/// * `since` - Start of the reporting window.
///
/// # Returns
///
/// A `Result` containing the `UsageStats`.
pub async fn usage_stats(pool: &Pool, now: DateTime<Utc>, since: DateTime<Utc>) -> Result<UsageStats> {
    let client = pool.get().await?;

    let generations = client
        .query_one(
            r#"
            SELECT
                COUNT(*) AS total_generations,
                COUNT(*) FILTER (WHERE success) AS successful_generations,
                COUNT(*) FILTER (WHERE created_at >= $1) AS generations_24h,
                COUNT(*) FILTER (WHERE success AND created_at >= $1) AS successful_generations_24h,
                COALESCE(AVG(processing_time_ms), 0)::FLOAT8 AS avg_processing_time_ms
            FROM image_generations
            "#,
            &[&since],
        )
        .await?;

    let subscribers = client
        .query_one(
            r#"
            SELECT COUNT(*) AS active_subscribers
            FROM subscriptions
            WHERE active = TRUE AND expires_at > $1
            "#,
            &[&now],
        )
        .await?;

    let revenue = client
        .query_one(
            r#"
            SELECT
                COUNT(*) AS processed_payments,
                COALESCE(SUM(amount), 0)::BIGINT AS total_revenue,
                COALESCE(SUM(amount) FILTER (WHERE processed_at >= $1), 0)::BIGINT AS revenue_24h
            FROM payments
            WHERE processed_at IS NOT NULL
            "#,
            &[&since],
        )
        .await?;

    Ok(UsageStats {
        total_generations: column(&generations, "total_generations")?,
        successful_generations: column(&generations, "successful_generations")?,
        generations_24h: column(&generations, "generations_24h")?,
        successful_generations_24h: column(&generations, "successful_generations_24h")?,
        avg_processing_time_ms: column(&generations, "avg_processing_time_ms")?,
        active_subscribers: column(&subscribers, "active_subscribers")?,
        processed_payments: column(&revenue, "processed_payments")?,
        total_revenue: column(&revenue, "total_revenue")?,
        revenue_24h: column(&revenue, "revenue_24h")?,
    })
}

/// Generation and payment counters of one identity.
pub async fn user_stats(pool: &Pool, identity: Identity) -> Result<UserStats> {
    let client = pool.get().await?;

    let generations = client
        .query_one(
            r#"
            SELECT
                COUNT(*) AS total_generations,
                COUNT(*) FILTER (WHERE success) AS successful_generations,
                COALESCE(AVG(processing_time_ms), 0)::FLOAT8 AS avg_processing_time_ms
            FROM image_generations
            WHERE identity = $1
            "#,
            &[&identity],
        )
        .await?;

    let payments = client
        .query_one(
            r#"
            SELECT
                COUNT(*) AS total_payments,
                COALESCE(SUM(amount) FILTER (WHERE processed_at IS NOT NULL), 0)::BIGINT AS total_paid_amount
            FROM payments
            WHERE identity = $1
            "#,
            &[&identity],
        )
        .await?;

    Ok(UserStats {
        identity,
        total_generations: column(&generations, "total_generations")?,
        successful_generations: column(&generations, "successful_generations")?,
        avg_processing_time_ms: column(&generations, "avg_processing_time_ms")?,
        total_payments: column(&payments, "total_payments")?,
        total_paid_amount: column(&payments, "total_paid_amount")?,
    })
}

use chrono::{DateTime, Utc};
use deadpool_postgres::{Pool, Transaction};
use tokio_postgres::Row;
use crate::{
    error::{AppError, Result},
    models::subscription::{Identity, PlanId, Subscription, SubscriptionGrant},
};

/// A helper function to map a `tokio_postgres::Row` to a `Subscription`.
fn row_to_subscription(row: &Row) -> Result<Subscription> {
    let plan: String = row.try_get("plan").map_err(|_| AppError::MissingData("plan".to_string()))?;
    Ok(Subscription {
        identity: row.try_get("identity").map_err(|_| AppError::MissingData("identity".to_string()))?,
        plan: plan.parse::<PlanId>().map_err(AppError::MissingData)?,
        active: row.try_get("active").map_err(|_| AppError::MissingData("active".to_string()))?,
        expires_at: row.try_get("expires_at").map_err(|_| AppError::MissingData("expires_at".to_string()))?,
        source_reference: row.try_get("source_reference").map_err(|_| AppError::MissingData("source_reference".to_string()))?,
        updated_at: row.try_get("updated_at").map_err(|_| AppError::MissingData("updated_at".to_string()))?,
    })
}

/// Finds the subscription row of an identity.
pub async fn find_by_identity(pool: &Pool, identity: Identity) -> Result<Option<Subscription>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            r#"
            SELECT identity, plan, active, expires_at, source_reference, updated_at
            FROM subscriptions
            WHERE identity = $1
            "#,
            &[&identity],
        )
        .await?;
    row.map(|r| row_to_subscription(&r)).transpose()
}

/// Clears the active flag of one identity if its paid period is over.
///
/// # Returns
///
/// `true` when a row was flipped.
pub async fn expire_if_lapsed(pool: &Pool, identity: Identity, now: DateTime<Utc>) -> Result<bool> {
    let client = pool.get().await?;
    let updated = client
        .execute(
            r#"
            UPDATE subscriptions
            SET active = FALSE, updated_at = $2
            WHERE identity = $1
              AND active = TRUE
              AND (expires_at IS NULL OR expires_at <= $2)
            "#,
            &[&identity, &now],
        )
        .await?;
    Ok(updated > 0)
}

/// Clears the active flag of every lapsed subscription.
///
/// # Returns
///
/// The number of rows flipped.
pub async fn deactivate_expired(pool: &Pool, now: DateTime<Utc>) -> Result<u64> {
    let client = pool.get().await?;
    let updated = client
        .execute(
            r#"
            UPDATE subscriptions
            SET active = FALSE, updated_at = $1
            WHERE active = TRUE
              AND (expires_at IS NULL OR expires_at <= $1)
            "#,
            &[&now],
        )
        .await?;
    Ok(updated)
}

/// Replaces the subscription row of the grant's identity inside a transaction.
pub async fn upsert_grant(tx: &Transaction<'_>, grant: &SubscriptionGrant) -> Result<Subscription> {
    let row = tx
        .query_one(
            r#"
            INSERT INTO subscriptions (identity, plan, active, expires_at, source_reference, updated_at)
            VALUES ($1, $2, TRUE, $3, $4, $5)
            ON CONFLICT (identity) DO UPDATE
            SET plan = EXCLUDED.plan,
                active = TRUE,
                expires_at = EXCLUDED.expires_at,
                source_reference = EXCLUDED.source_reference,
                updated_at = EXCLUDED.updated_at
            RETURNING identity, plan, active, expires_at, source_reference, updated_at
            "#,
            &[
                &grant.identity,
                &grant.plan.as_str(),
                &grant.expires_at,
                &grant.source_reference,
                &grant.starts_at,
            ],
        )
        .await?;
    row_to_subscription(&row)
}

/// Applies a grant in its own transaction.
pub async fn apply_grant(pool: &Pool, grant: &SubscriptionGrant) -> Result<Subscription> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;
    let subscription = upsert_grant(&tx, grant).await?;
    tx.commit().await?;
    Ok(subscription)
}

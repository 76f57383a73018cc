use chrono::Utc;
use deadpool_postgres::Pool;
use crate::{
    error::Result,
    models::{
        payment::{PaymentEvent, Settlement},
        subscription::SubscriptionGrant,
    },
    repositories::subscription as subscription_repo,
};

/// Records a payment notification that does not grant anything.
///
/// A row that was already processed keeps its status; replays of a
/// non-succeeded status only refresh the status of an unprocessed row.
pub async fn record_event(pool: &Pool, event: &PaymentEvent) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            r#"
            INSERT INTO payments (payment_id, identity, plan, amount, currency, status, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (payment_id) DO UPDATE
            SET status = EXCLUDED.status
            WHERE payments.processed_at IS NULL
            "#,
            &[
                &event.payment_id,
                &event.identity,
                &event.plan.as_str(),
                &event.amount,
                &event.currency,
                &event.status.as_str(),
                &event.received_at,
            ],
        )
        .await?;
    Ok(())
}

/// Marks a succeeded payment as processed and applies its grant, atomically.
///
/// The `processed_at IS NULL` guard makes the conflicting insert return no
/// row for a payment id that was already processed, including one processed
/// by a concurrent delivery that committed first.
///
/// # Arguments
///
/// * `pool` - The database connection pool.
/// * `event` - The succeeded payment.
/// * `grant` - The grant computed from the current subscription row.
///
/// # Returns
///
/// A `Result` containing the `Settlement`.
pub async fn settle(pool: &Pool, event: &PaymentEvent, grant: &SubscriptionGrant) -> Result<Settlement> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    let processed_at = Utc::now();
    let claimed = tx
        .query_opt(
            r#"
            INSERT INTO payments (payment_id, identity, plan, amount, currency, status, received_at, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (payment_id) DO UPDATE
            SET status = EXCLUDED.status, processed_at = EXCLUDED.processed_at
            WHERE payments.processed_at IS NULL
            RETURNING payment_id
            "#,
            &[
                &event.payment_id,
                &event.identity,
                &event.plan.as_str(),
                &event.amount,
                &event.currency,
                &event.status.as_str(),
                &event.received_at,
                &processed_at,
            ],
        )
        .await?;

    if claimed.is_none() {
        tx.rollback().await?;
        return Ok(Settlement::AlreadyProcessed);
    }

    let subscription = subscription_repo::upsert_grant(&tx, grant).await?;
    tx.commit().await?;
    Ok(Settlement::Granted(subscription))
}

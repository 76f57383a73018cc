use deadpool_postgres::Pool;
use crate::{error::Result, models::generation::GenerationLogEntry};

/// Appends one finished job to the audit log.
pub async fn insert_entry(pool: &Pool, entry: &GenerationLogEntry) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            r#"
            INSERT INTO image_generations (identity, kind, prompt, result_reference, success, processing_time_ms, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
            &[
                &entry.identity,
                &entry.kind.as_str(),
                &entry.prompt,
                &entry.result_reference,
                &entry.success,
                &entry.processing_time_ms,
                &entry.created_at,
            ],
        )
        .await?;
    Ok(())
}

use anyhow::Context;
use chrono::{Datelike, NaiveDate};

// Advisory locks are scoped to the Postgres session. Best-effort guard
// against two nightly runs processing the same job date concurrently.
const LOCK_NAMESPACE: i64 = 0x464F_4C49_4F00; // "FOLIO" as hex-ish namespace.

fn lock_key_for_date(job_date: NaiveDate) -> i64 {
    LOCK_NAMESPACE ^ (job_date.num_days_from_ce() as i64)
}

pub async fn try_acquire_job_date_lock(
    pool: &sqlx::PgPool,
    job_date: NaiveDate,
) -> anyhow::Result<bool> {
    let key = lock_key_for_date(job_date);
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(key)
        .fetch_one(pool)
        .await
        .with_context(|| format!("failed to acquire advisory lock (key={key})"))?;
    Ok(acquired.0)
}

pub async fn release_job_date_lock(
    pool: &sqlx::PgPool,
    job_date: NaiveDate,
) -> anyhow::Result<()> {
    let key = lock_key_for_date(job_date);
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .persistent(false)
        .bind(key)
        .execute(pool)
        .await
        .with_context(|| format!("failed to release advisory lock (key={key})"))?;
    Ok(())
}

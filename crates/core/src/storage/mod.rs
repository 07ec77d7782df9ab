pub mod alerts;
pub mod events;
pub mod investments;
pub mod jobs;
pub mod lock;
pub mod memory;
pub mod portfolios;
pub mod recommendations;
pub mod scores;

use anyhow::Context;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

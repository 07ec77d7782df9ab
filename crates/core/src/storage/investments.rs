use crate::decimal::money_string;
use crate::domain::event::{EventType, InvestmentRecordedPayload};
use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Record an investment against a recommendation: the investment row, the
/// holding-quantity upsert, and the INVESTMENT_RECORDED event commit in one
/// transaction: a confirmed investment with an unchanged holding (or a
/// missing audit event) must be impossible.
pub async fn record_investment(
    pool: &sqlx::PgPool,
    user_id: Uuid,
    portfolio_id: Uuid,
    asset_id: Uuid,
    amount: Decimal,
    quantity: Decimal,
    correlation_id: Uuid,
) -> Result<Uuid> {
    anyhow::ensure!(amount > Decimal::ZERO, "investment amount must be positive");
    anyhow::ensure!(
        quantity > Decimal::ZERO,
        "investment quantity must be positive"
    );

    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let investment_id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO investments (id, user_id, portfolio_id, asset_id, amount, quantity, status, correlation_id, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, 'recorded', $7, $8)",
    )
    .bind(investment_id)
    .bind(user_id)
    .bind(portfolio_id)
    .bind(asset_id)
    .bind(amount)
    .bind(quantity)
    .bind(correlation_id)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("insert investments failed")?;

    sqlx::query(
        "INSERT INTO holdings (portfolio_id, asset_id, quantity) \
         VALUES ($1, $2, $3) \
         ON CONFLICT (portfolio_id, asset_id) DO UPDATE \
           SET quantity = holdings.quantity + EXCLUDED.quantity",
    )
    .bind(portfolio_id)
    .bind(asset_id)
    .bind(quantity)
    .execute(&mut *tx)
    .await
    .context("upsert holdings failed")?;

    let payload = InvestmentRecordedPayload {
        investment_id,
        portfolio_id,
        asset_id,
        amount: money_string(amount),
        quantity: quantity.to_string(),
    };

    sqlx::query(
        "INSERT INTO calculation_events (id, correlation_id, user_id, event_type, payload, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(Uuid::new_v4())
    .bind(correlation_id)
    .bind(user_id)
    .bind(EventType::InvestmentRecorded.as_str())
    .bind(serde_json::to_value(&payload).context("serialize investment payload failed")?)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("insert INVESTMENT_RECORDED event failed")?;

    tx.commit().await.context("commit transaction failed")?;
    Ok(investment_id)
}

/// Mark a recorded investment as confirmed (settlement observed) and append
/// the confirmation event atomically.
pub async fn confirm_investment(pool: &sqlx::PgPool, investment_id: Uuid) -> Result<()> {
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let row: Option<(Uuid, Uuid, String)> = sqlx::query_as(
        "UPDATE investments SET status = 'confirmed', confirmed_at = $2 \
         WHERE id = $1 AND status = 'recorded' \
         RETURNING user_id, correlation_id, status",
    )
    .bind(investment_id)
    .bind(Utc::now())
    .fetch_optional(&mut *tx)
    .await
    .context("confirm investments failed")?;

    let Some((user_id, correlation_id, _)) = row else {
        anyhow::bail!("investment {investment_id} not found or not in 'recorded' state");
    };

    sqlx::query(
        "INSERT INTO calculation_events (id, correlation_id, user_id, event_type, payload, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(Uuid::new_v4())
    .bind(correlation_id)
    .bind(user_id)
    .bind(EventType::InvestmentConfirmed.as_str())
    .bind(serde_json::json!({ "investment_id": investment_id }))
    .bind(Utc::now())
    .execute(&mut *tx)
    .await
    .context("insert INVESTMENT_CONFIRMED event failed")?;

    tx.commit().await.context("commit transaction failed")?;
    Ok(())
}

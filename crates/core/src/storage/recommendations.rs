use crate::domain::recommendation::{AllocationGap, AuditTrail, GeneratedRecommendation, RecommendationItem};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Recommendations are insert-only; every generation run produces a new row
/// and readers take the latest per user.
#[async_trait::async_trait]
pub trait RecommendationStore: Send + Sync {
    async fn insert(&self, rec: &GeneratedRecommendation) -> Result<Uuid>;

    async fn latest_for_user(&self, user_id: Uuid) -> Result<Option<GeneratedRecommendation>>;
}

#[derive(Debug, Clone)]
pub struct PgRecommendationStore {
    pool: sqlx::PgPool,
}

impl PgRecommendationStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RecommendationStore for PgRecommendationStore {
    async fn insert(&self, rec: &GeneratedRecommendation) -> Result<Uuid> {
        let items = serde_json::to_value(&rec.items).context("serialize items failed")?;
        let gaps =
            serde_json::to_value(&rec.allocation_gaps).context("serialize allocation gaps failed")?;
        let audit =
            serde_json::to_value(&rec.audit_trail).context("serialize audit trail failed")?;

        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO recommendations \
             (id, user_id, portfolio_id, generated_at, total_investable, base_currency, items, allocation_gaps, audit_trail) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(rec.user_id)
        .bind(rec.portfolio_id)
        .bind(rec.generated_at)
        .bind(&rec.total_investable)
        .bind(&rec.base_currency)
        .bind(items)
        .bind(gaps)
        .bind(audit)
        .fetch_one(&self.pool)
        .await
        .context("insert recommendation failed")?;

        Ok(id)
    }

    async fn latest_for_user(&self, user_id: Uuid) -> Result<Option<GeneratedRecommendation>> {
        let row = sqlx::query_as::<
            _,
            (Uuid, Uuid, DateTime<Utc>, String, String, Value, Value, Value),
        >(
            "SELECT user_id, portfolio_id, generated_at, total_investable, base_currency, items, allocation_gaps, audit_trail \
             FROM recommendations \
             WHERE user_id = $1 \
             ORDER BY generated_at DESC \
             LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("select latest recommendation failed")?;

        let Some((
            user_id,
            portfolio_id,
            generated_at,
            total_investable,
            base_currency,
            items,
            allocation_gaps,
            audit_trail,
        )) = row
        else {
            return Ok(None);
        };

        let items: Vec<RecommendationItem> =
            serde_json::from_value(items).context("invalid items JSON in recommendations row")?;
        let allocation_gaps: Vec<AllocationGap> = serde_json::from_value(allocation_gaps)
            .context("invalid allocation_gaps JSON in recommendations row")?;
        let audit_trail: AuditTrail = serde_json::from_value(audit_trail)
            .context("invalid audit_trail JSON in recommendations row")?;

        Ok(Some(GeneratedRecommendation {
            user_id,
            portfolio_id,
            generated_at,
            total_investable,
            base_currency,
            items,
            allocation_gaps,
            audit_trail,
        }))
    }
}

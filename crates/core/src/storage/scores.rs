use crate::domain::score::StoredScore;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

const UPSERT_CHUNK: usize = 200;

/// One asset's score ready for persistence.
#[derive(Debug, Clone)]
pub struct NewScore {
    pub asset_id: Uuid,
    pub symbol: String,
    pub class_id: Uuid,
    pub score: Decimal,
    pub percentage: Decimal,
    pub breakdown: Value,
}

/// Latest-score upsert plus history append, atomically.
#[async_trait::async_trait]
pub trait ScoreStore: Send + Sync {
    async fn upsert_latest(
        &self,
        user_id: Uuid,
        correlation_id: Uuid,
        criteria_version_id: Uuid,
        computed_at: DateTime<Utc>,
        scores: &[NewScore],
    ) -> Result<u64>;

    async fn latest_for_user(&self, user_id: Uuid) -> Result<Vec<StoredScore>>;
}

#[derive(Debug, Clone)]
pub struct PgScoreStore {
    pool: sqlx::PgPool,
}

impl PgScoreStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ScoreStore for PgScoreStore {
    async fn upsert_latest(
        &self,
        user_id: Uuid,
        correlation_id: Uuid,
        criteria_version_id: Uuid,
        computed_at: DateTime<Utc>,
        scores: &[NewScore],
    ) -> Result<u64> {
        anyhow::ensure!(!scores.is_empty(), "scores must be non-empty");

        let mut tx = self.pool.begin().await.context("begin transaction failed")?;
        let mut affected: u64 = 0;

        // Batched to cut round trips; keep it transactional (latest and
        // history move together or not at all).
        for chunk in scores.chunks(UPSERT_CHUNK) {
            let mut qb = sqlx::QueryBuilder::new(
                "INSERT INTO asset_scores \
                 (user_id, asset_id, symbol, class_id, score, percentage, breakdown, correlation_id, criteria_version_id, computed_at) ",
            );
            qb.push_values(chunk, |mut b, s| {
                b.push_bind(user_id)
                    .push_bind(s.asset_id)
                    .push_bind(&s.symbol)
                    .push_bind(s.class_id)
                    .push_bind(s.score)
                    .push_bind(s.percentage)
                    .push_bind(&s.breakdown)
                    .push_bind(correlation_id)
                    .push_bind(criteria_version_id)
                    .push_bind(computed_at);
            });
            qb.push(
                " ON CONFLICT (user_id, asset_id) DO UPDATE \
                   SET symbol = EXCLUDED.symbol, class_id = EXCLUDED.class_id, \
                       score = EXCLUDED.score, percentage = EXCLUDED.percentage, \
                       breakdown = EXCLUDED.breakdown, correlation_id = EXCLUDED.correlation_id, \
                       criteria_version_id = EXCLUDED.criteria_version_id, computed_at = EXCLUDED.computed_at",
            );

            let res = qb
                .build()
                .persistent(false)
                .execute(&mut *tx)
                .await
                .context("batch upsert asset_scores failed")?;
            affected += res.rows_affected();

            let mut hb = sqlx::QueryBuilder::new(
                "INSERT INTO asset_score_history \
                 (id, user_id, asset_id, symbol, class_id, score, percentage, breakdown, correlation_id, criteria_version_id, computed_at) ",
            );
            hb.push_values(chunk, |mut b, s| {
                b.push_bind(Uuid::new_v4())
                    .push_bind(user_id)
                    .push_bind(s.asset_id)
                    .push_bind(&s.symbol)
                    .push_bind(s.class_id)
                    .push_bind(s.score)
                    .push_bind(s.percentage)
                    .push_bind(&s.breakdown)
                    .push_bind(correlation_id)
                    .push_bind(criteria_version_id)
                    .push_bind(computed_at);
            });

            hb.build()
                .persistent(false)
                .execute(&mut *tx)
                .await
                .context("append asset_score_history failed")?;
        }

        tx.commit().await.context("commit transaction failed")?;
        Ok(affected)
    }

    async fn latest_for_user(&self, user_id: Uuid) -> Result<Vec<StoredScore>> {
        let rows = sqlx::query_as::<
            _,
            (
                Uuid,
                Uuid,
                String,
                Uuid,
                Decimal,
                Decimal,
                Uuid,
                Uuid,
                DateTime<Utc>,
            ),
        >(
            "SELECT user_id, asset_id, symbol, class_id, score, percentage, correlation_id, criteria_version_id, computed_at \
             FROM asset_scores \
             WHERE user_id = $1 \
             ORDER BY symbol ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("select asset_scores failed")?;

        Ok(rows
            .into_iter()
            .map(
                |(
                    user_id,
                    asset_id,
                    symbol,
                    class_id,
                    score,
                    percentage,
                    correlation_id,
                    criteria_version_id,
                    computed_at,
                )| StoredScore {
                    user_id,
                    asset_id,
                    symbol,
                    class_id,
                    score,
                    percentage,
                    correlation_id,
                    criteria_version_id,
                    computed_at,
                },
            )
            .collect())
    }
}

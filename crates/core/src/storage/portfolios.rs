use crate::domain::criteria::{CriteriaSet, Criterion, CriterionOperator};
use crate::domain::portfolio::{CandidateAsset, ClassTarget, Holding, Portfolio};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Read-side contract onto the user/portfolio/criteria schema. The pipeline
/// only reads these; configuration CRUD lives elsewhere.
#[async_trait::async_trait]
pub trait PortfolioReader: Send + Sync {
    async fn active_user_ids(&self) -> Result<Vec<Uuid>>;

    async fn portfolio_for_user(&self, user_id: Uuid) -> Result<Option<Portfolio>>;

    async fn holdings(&self, portfolio_id: Uuid) -> Result<Vec<Holding>>;

    /// The user's active criteria set, newest version wins.
    async fn active_criteria(&self, user_id: Uuid) -> Result<Option<CriteriaSet>>;

    /// Scoring universe: every asset eligible for recommendation, held or not.
    async fn candidate_assets(&self) -> Result<Vec<CandidateAsset>>;

    async fn class_targets(&self, portfolio_id: Uuid) -> Result<Vec<ClassTarget>>;
}

#[derive(Debug, Clone)]
pub struct PgPortfolioReader {
    pool: sqlx::PgPool,
}

impl PgPortfolioReader {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

fn parse_operator(s: &str) -> Result<CriterionOperator> {
    match s {
        "eq" => Ok(CriterionOperator::Eq),
        "neq" => Ok(CriterionOperator::Neq),
        "gt" => Ok(CriterionOperator::Gt),
        "gte" => Ok(CriterionOperator::Gte),
        "lt" => Ok(CriterionOperator::Lt),
        "lte" => Ok(CriterionOperator::Lte),
        "between" => Ok(CriterionOperator::Between),
        "exists" => Ok(CriterionOperator::Exists),
        other => anyhow::bail!("unknown criterion operator: {other}"),
    }
}

#[async_trait::async_trait]
impl PortfolioReader for PgPortfolioReader {
    async fn active_user_ids(&self) -> Result<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> =
            sqlx::query_as("SELECT id FROM users WHERE is_active ORDER BY created_at ASC, id ASC")
                .fetch_all(&self.pool)
                .await
                .context("select active users failed")?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn portfolio_for_user(&self, user_id: Uuid) -> Result<Option<Portfolio>> {
        let row = sqlx::query_as::<_, (Uuid, Uuid, String, Decimal)>(
            "SELECT id, user_id, base_currency, total_investable \
             FROM portfolios \
             WHERE user_id = $1 \
             ORDER BY created_at ASC \
             LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("select portfolio failed")?;

        Ok(row.map(|(id, user_id, base_currency, total_investable)| Portfolio {
            id,
            user_id,
            base_currency,
            total_investable,
        }))
    }

    async fn holdings(&self, portfolio_id: Uuid) -> Result<Vec<Holding>> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, String, Uuid, Decimal, String)>(
            "SELECT h.portfolio_id, h.asset_id, a.symbol, a.class_id, h.quantity, a.currency \
             FROM holdings h \
             JOIN assets a ON a.id = h.asset_id \
             WHERE h.portfolio_id = $1 AND h.quantity > 0 \
             ORDER BY a.symbol ASC",
        )
        .bind(portfolio_id)
        .fetch_all(&self.pool)
        .await
        .context("select holdings failed")?;

        Ok(rows
            .into_iter()
            .map(
                |(portfolio_id, asset_id, symbol, class_id, quantity, currency)| Holding {
                    portfolio_id,
                    asset_id,
                    symbol,
                    class_id,
                    quantity,
                    currency,
                },
            )
            .collect())
    }

    async fn active_criteria(&self, user_id: Uuid) -> Result<Option<CriteriaSet>> {
        let set = sqlx::query_as::<_, (Uuid, i32)>(
            "SELECT id, version FROM criteria_sets \
             WHERE user_id = $1 AND is_active \
             ORDER BY version DESC \
             LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("select criteria_sets failed")?;

        let Some((set_id, version)) = set else {
            return Ok(None);
        };

        let rows = sqlx::query_as::<
            _,
            (Uuid, String, String, Option<Decimal>, Option<Decimal>, Decimal, bool),
        >(
            "SELECT id, metric, operator, threshold, threshold_high, points, requires_fresh \
             FROM criteria \
             WHERE set_id = $1 \
             ORDER BY position ASC",
        )
        .bind(set_id)
        .fetch_all(&self.pool)
        .await
        .context("select criteria failed")?;

        let mut criteria = Vec::with_capacity(rows.len());
        for (id, metric, operator, threshold, threshold_high, points, requires_fresh) in rows {
            criteria.push(Criterion {
                id,
                metric,
                operator: parse_operator(&operator)?,
                threshold,
                threshold_high,
                points,
                requires_fresh,
            });
        }

        Ok(Some(CriteriaSet {
            id: set_id,
            user_id,
            version,
            criteria,
        }))
    }

    async fn candidate_assets(&self) -> Result<Vec<CandidateAsset>> {
        let rows = sqlx::query_as::<_, (Uuid, String, String, Uuid, String)>(
            "SELECT id, symbol, name, class_id, currency \
             FROM assets \
             WHERE is_active \
             ORDER BY symbol ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("select candidate assets failed")?;

        Ok(rows
            .into_iter()
            .map(|(id, symbol, name, class_id, currency)| CandidateAsset {
                id,
                symbol,
                name,
                class_id,
                currency,
            })
            .collect())
    }

    async fn class_targets(&self, portfolio_id: Uuid) -> Result<Vec<ClassTarget>> {
        let rows = sqlx::query_as::<_, (Uuid, String, Decimal, Decimal)>(
            "SELECT t.class_id, c.name, t.target_min, t.target_max \
             FROM class_targets t \
             JOIN asset_classes c ON c.id = t.class_id \
             WHERE t.portfolio_id = $1 \
             ORDER BY c.name ASC",
        )
        .bind(portfolio_id)
        .fetch_all(&self.pool)
        .await
        .context("select class targets failed")?;

        Ok(rows
            .into_iter()
            .map(|(class_id, class_name, target_min, target_max)| ClassTarget {
                class_id,
                class_name,
                target_min,
                target_max,
            })
            .collect())
    }
}

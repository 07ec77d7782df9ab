use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One scoring rule in a versioned criteria set: compare a named metric
/// against a threshold and award signed points on match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Criterion {
    pub id: Uuid,
    /// Metric key resolved against the fundamentals snapshot ("pe_ratio",
    /// "dividend_yield", ...) or the reserved "price" key.
    pub metric: String,
    pub operator: CriterionOperator,
    pub threshold: Option<Decimal>,
    /// Upper bound, only meaningful for `between`.
    pub threshold_high: Option<Decimal>,
    /// Signed: negative criteria penalize on match.
    pub points: Decimal,
    /// When set, a stale fundamentals snapshot skips this criterion instead
    /// of evaluating it.
    #[serde(default)]
    pub requires_fresh: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Between,
    Exists,
}

/// A user's criteria at one version. Stored order is evaluation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriteriaSet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub version: i32,
    pub criteria: Vec<Criterion>,
}

impl CriteriaSet {
    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-asset scoring output. Score fields are fixed-precision decimal
/// strings; replay verification compares them byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetScoreResult {
    pub asset_id: Uuid,
    pub symbol: String,
    pub score: String,
    pub max_possible_score: String,
    pub percentage: String,
    pub breakdown: Vec<CriterionBreakdown>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionBreakdown {
    pub criterion_id: Uuid,
    pub matched: bool,
    pub points_awarded: String,
    pub actual_value: Option<String>,
    pub skipped_reason: Option<SkippedReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkippedReason {
    MissingFundamental,
    DataStale,
}

/// Latest persisted score for one (user, asset), as read back for alerting
/// and recommendation generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredScore {
    pub user_id: Uuid,
    pub asset_id: Uuid,
    pub symbol: String,
    pub class_id: Uuid,
    pub score: Decimal,
    pub percentage: Decimal,
    pub correlation_id: Uuid,
    pub criteria_version_id: Uuid,
    pub computed_at: DateTime<Utc>,
}

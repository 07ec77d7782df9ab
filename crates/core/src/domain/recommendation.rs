use crate::domain::market::ExchangeRates;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Output of one generation run for one user. Never updated in place; each
/// run inserts a new record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedRecommendation {
    pub user_id: Uuid,
    pub portfolio_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub total_investable: String,
    pub base_currency: String,
    pub items: Vec<RecommendationItem>,
    pub allocation_gaps: Vec<AllocationGap>,
    pub audit_trail: AuditTrail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationItem {
    pub asset_id: Uuid,
    pub symbol: String,
    pub class_id: Uuid,
    pub score: String,
    pub percentage: String,
    pub recommended_amount: String,
    pub is_over_allocated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationGap {
    pub class_id: Uuid,
    pub class_name: String,
    pub current_allocation: String,
    pub target_min: String,
    pub target_max: String,
    pub target_midpoint: String,
    /// Signed: midpoint minus current. Positive means under-allocated.
    pub gap: String,
}

/// Everything needed to reconstruct the exact inputs of this recommendation
/// later (confirmation, replay, dispute).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditTrail {
    pub criteria_version_id: Uuid,
    pub exchange_rates_snapshot: ExchangeRates,
    pub scores_correlation_id: Uuid,
    pub prices_as_of: DateTime<Utc>,
    pub rates_as_of: DateTime<Utc>,
}

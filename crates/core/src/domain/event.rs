use crate::domain::criteria::Criterion;
use crate::domain::market::{ExchangeRates, FundamentalRatios, AssetPrice};
use crate::domain::score::AssetScoreResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Events not tied to a single user (market-data refreshes) are recorded
/// against the nil UUID.
pub const SYSTEM_USER_ID: Uuid = Uuid::nil();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    CalcStarted,
    InputsCaptured,
    ScoresComputed,
    CalcCompleted,
    InvestmentRecorded,
    InvestmentConfirmed,
    DataRefreshed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::CalcStarted => "CALC_STARTED",
            EventType::InputsCaptured => "INPUTS_CAPTURED",
            EventType::ScoresComputed => "SCORES_COMPUTED",
            EventType::CalcCompleted => "CALC_COMPLETED",
            EventType::InvestmentRecorded => "INVESTMENT_RECORDED",
            EventType::InvestmentConfirmed => "INVESTMENT_CONFIRMED",
            EventType::DataRefreshed => "DATA_REFRESHED",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "CALC_STARTED" => Ok(EventType::CalcStarted),
            "INPUTS_CAPTURED" => Ok(EventType::InputsCaptured),
            "SCORES_COMPUTED" => Ok(EventType::ScoresComputed),
            "CALC_COMPLETED" => Ok(EventType::CalcCompleted),
            "INVESTMENT_RECORDED" => Ok(EventType::InvestmentRecorded),
            "INVESTMENT_CONFIRMED" => Ok(EventType::InvestmentConfirmed),
            "DATA_REFRESHED" => Ok(EventType::DataRefreshed),
            other => anyhow::bail!("unknown event type: {other}"),
        }
    }
}

/// One immutable record in the calculation audit log. Corrections are new
/// events, never mutations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationEvent {
    pub id: Uuid,
    pub correlation_id: Uuid,
    pub user_id: Uuid,
    pub event_type: EventType,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// What a caller hands to the event store; id and created_at are assigned on
/// append.
#[derive(Debug, Clone)]
pub struct NewCalculationEvent {
    pub correlation_id: Uuid,
    pub user_id: Uuid,
    pub event_type: EventType,
    pub payload: Value,
}

impl NewCalculationEvent {
    pub fn new(
        correlation_id: Uuid,
        user_id: Uuid,
        event_type: EventType,
        payload: Value,
    ) -> Self {
        Self {
            correlation_id,
            user_id,
            event_type,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalcStartedPayload {
    pub portfolio_id: Uuid,
    pub criteria_version_id: Uuid,
}

/// The exact snapshot a calculation ran against. Replay re-scores from this
/// payload alone, so it must be self-contained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputsCapturedPayload {
    pub criteria_version_id: Uuid,
    pub criteria: Vec<Criterion>,
    pub assets: Vec<CapturedAsset>,
    pub fundamentals: Vec<FundamentalRatios>,
    pub prices: Vec<AssetPrice>,
    pub rates: ExchangeRates,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedAsset {
    pub asset_id: Uuid,
    pub symbol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoresComputedPayload {
    pub criteria_version_id: Uuid,
    pub results: Vec<AssetScoreResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalcCompletedPayload {
    pub assets_scored: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRefreshedPayload {
    pub prices_fetched: usize,
    pub rates_fetched: usize,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestmentRecordedPayload {
    pub investment_id: Uuid,
    pub portfolio_id: Uuid,
    pub asset_id: Uuid,
    pub amount: String,
    pub quantity: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_serializes_screaming_snake() {
        let s = serde_json::to_string(&EventType::InputsCaptured).unwrap();
        assert_eq!(s, "\"INPUTS_CAPTURED\"");
        let back: EventType = serde_json::from_str(&s).unwrap();
        assert_eq!(back, EventType::InputsCaptured);
    }

    #[test]
    fn event_type_parse_matches_as_str() {
        for et in [
            EventType::CalcStarted,
            EventType::InputsCaptured,
            EventType::ScoresComputed,
            EventType::CalcCompleted,
            EventType::InvestmentRecorded,
            EventType::InvestmentConfirmed,
            EventType::DataRefreshed,
        ] {
            assert_eq!(EventType::parse(et.as_str()).unwrap(), et);
        }
        assert!(EventType::parse("SOMETHING_ELSE").is_err());
    }
}

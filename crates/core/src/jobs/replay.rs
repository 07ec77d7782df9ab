use crate::domain::event::{EventType, InputsCapturedPayload, ScoresComputedPayload};
use crate::domain::score::AssetScoreResult;
use crate::scoring::engine::{score_assets, ScoringInputs};
use crate::storage::events::EventStore;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Synthetic discrepancy id reported when original and replayed result
/// counts differ.
const LENGTH_MISMATCH_ID: &str = "_length_mismatch";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discrepancy {
    pub asset_id: String,
    pub field: String,
    pub original: String,
    pub replayed: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResult {
    /// True iff the history was replayable and every score string matched.
    pub verified: bool,
    pub error: Option<String>,
    pub discrepancies: Vec<Discrepancy>,
}

impl VerifyResult {
    fn failed(error: String) -> Self {
        Self {
            verified: false,
            error: Some(error),
            discrepancies: Vec::new(),
        }
    }
}

/// Re-run the scoring engine on the captured inputs of one calculation and
/// compare against what was originally recorded. A mismatch is data, not an
/// error: store failures are the only Err path.
pub async fn verify(events: &dyn EventStore, correlation_id: Uuid) -> Result<VerifyResult> {
    let sequence = events.get_by_correlation_id(correlation_id).await?;
    if sequence.is_empty() {
        return Ok(VerifyResult::failed(format!(
            "No events found for correlation ID: {correlation_id}"
        )));
    }

    let Some(inputs_event) = sequence
        .iter()
        .find(|e| e.event_type == EventType::InputsCaptured)
    else {
        return Ok(VerifyResult::failed(
            "INPUTS_CAPTURED event not found".to_string(),
        ));
    };
    let Some(scores_event) = sequence
        .iter()
        .find(|e| e.event_type == EventType::ScoresComputed)
    else {
        return Ok(VerifyResult::failed(
            "SCORES_COMPUTED event not found".to_string(),
        ));
    };

    let captured: InputsCapturedPayload = serde_json::from_value(inputs_event.payload.clone())
        .context("invalid INPUTS_CAPTURED payload")?;
    let original: ScoresComputedPayload = serde_json::from_value(scores_event.payload.clone())
        .context("invalid SCORES_COMPUTED payload")?;

    let replayed = score_assets(&ScoringInputs::from_captured(&captured));
    let discrepancies = compare_results(&original.results, &replayed);

    Ok(VerifyResult {
        verified: discrepancies.is_empty(),
        error: None,
        discrepancies,
    })
}

/// Exact decimal-string comparison per asset id. Any divergence (count,
/// missing asset, or a single score string) is reported.
pub fn compare_results(
    original: &[AssetScoreResult],
    replayed: &[AssetScoreResult],
) -> Vec<Discrepancy> {
    let mut discrepancies = Vec::new();

    if original.len() != replayed.len() {
        discrepancies.push(Discrepancy {
            asset_id: LENGTH_MISMATCH_ID.to_string(),
            field: "result_count".to_string(),
            original: original.len().to_string(),
            replayed: replayed.len().to_string(),
        });
    }

    let replayed_by_id: BTreeMap<Uuid, &AssetScoreResult> =
        replayed.iter().map(|r| (r.asset_id, r)).collect();

    for orig in original {
        let Some(replay) = replayed_by_id.get(&orig.asset_id) else {
            discrepancies.push(Discrepancy {
                asset_id: orig.asset_id.to_string(),
                field: "presence".to_string(),
                original: orig.score.clone(),
                replayed: "<absent>".to_string(),
            });
            continue;
        };

        for (field, a, b) in [
            ("score", &orig.score, &replay.score),
            (
                "max_possible_score",
                &orig.max_possible_score,
                &replay.max_possible_score,
            ),
            ("percentage", &orig.percentage, &replay.percentage),
        ] {
            if a != b {
                discrepancies.push(Discrepancy {
                    asset_id: orig.asset_id.to_string(),
                    field: field.to_string(),
                    original: a.clone(),
                    replayed: b.clone(),
                });
            }
        }
    }

    discrepancies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::criteria::{Criterion, CriterionOperator};
    use crate::domain::event::{CapturedAsset, NewCalculationEvent};
    use crate::domain::market::{ExchangeRates, FundamentalRatios};
    use crate::storage::memory::MemoryEventStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn captured_payload() -> InputsCapturedPayload {
        let asset = CapturedAsset {
            asset_id: Uuid::new_v4(),
            symbol: "VOO".to_string(),
        };
        InputsCapturedPayload {
            criteria_version_id: Uuid::new_v4(),
            criteria: vec![Criterion {
                id: Uuid::new_v4(),
                metric: "pe_ratio".to_string(),
                operator: CriterionOperator::Lt,
                threshold: Some(dec!(20)),
                threshold_high: None,
                points: dec!(10),
                requires_fresh: false,
            }],
            assets: vec![asset],
            fundamentals: vec![FundamentalRatios {
                symbol: "VOO".to_string(),
                ratios: [("pe_ratio".to_string(), dec!(15))].into_iter().collect(),
                as_of: Utc::now(),
                source: "test".to_string(),
                is_stale: false,
            }],
            prices: vec![],
            rates: ExchangeRates {
                base: "USD".to_string(),
                rates: Default::default(),
                fetched_at: Utc::now(),
                source: "test".to_string(),
            },
        }
    }

    async fn seed_history(
        store: &MemoryEventStore,
        correlation_id: Uuid,
        tamper: impl FnOnce(&mut Vec<AssetScoreResult>),
    ) {
        let user_id = Uuid::new_v4();
        let captured = captured_payload();

        let mut results = score_assets(&ScoringInputs::from_captured(&captured));
        tamper(&mut results);

        store
            .append(NewCalculationEvent::new(
                correlation_id,
                user_id,
                EventType::InputsCaptured,
                serde_json::to_value(&captured).unwrap(),
            ))
            .await
            .unwrap();
        store
            .append(NewCalculationEvent::new(
                correlation_id,
                user_id,
                EventType::ScoresComputed,
                serde_json::to_value(&ScoresComputedPayload {
                    criteria_version_id: captured.criteria_version_id,
                    results,
                })
                .unwrap(),
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_correlation_id_reports_no_events() {
        let store = MemoryEventStore::new();
        let correlation_id = Uuid::new_v4();

        let result = verify(&store, correlation_id).await.unwrap();
        assert!(!result.verified);
        assert_eq!(
            result.error.as_deref(),
            Some(format!("No events found for correlation ID: {correlation_id}").as_str())
        );
    }

    #[tokio::test]
    async fn missing_inputs_event_is_reported_by_name() {
        let store = MemoryEventStore::new();
        let correlation_id = Uuid::new_v4();
        store
            .append(NewCalculationEvent::new(
                correlation_id,
                Uuid::new_v4(),
                EventType::CalcStarted,
                serde_json::json!({}),
            ))
            .await
            .unwrap();

        let result = verify(&store, correlation_id).await.unwrap();
        assert_eq!(result.error.as_deref(), Some("INPUTS_CAPTURED event not found"));
    }

    #[tokio::test]
    async fn missing_scores_event_is_reported_by_name() {
        let store = MemoryEventStore::new();
        let correlation_id = Uuid::new_v4();
        store
            .append(NewCalculationEvent::new(
                correlation_id,
                Uuid::new_v4(),
                EventType::InputsCaptured,
                serde_json::to_value(captured_payload()).unwrap(),
            ))
            .await
            .unwrap();

        let result = verify(&store, correlation_id).await.unwrap();
        assert_eq!(result.error.as_deref(), Some("SCORES_COMPUTED event not found"));
    }

    #[tokio::test]
    async fn untouched_history_verifies_clean() {
        let store = MemoryEventStore::new();
        let correlation_id = Uuid::new_v4();
        seed_history(&store, correlation_id, |_| {}).await;

        let result = verify(&store, correlation_id).await.unwrap();
        assert!(result.verified);
        assert!(result.discrepancies.is_empty());
    }

    #[tokio::test]
    async fn tampered_score_is_a_field_discrepancy() {
        let store = MemoryEventStore::new();
        let correlation_id = Uuid::new_v4();
        seed_history(&store, correlation_id, |results| {
            results[0].score = "99.0000".to_string();
        })
        .await;

        let result = verify(&store, correlation_id).await.unwrap();
        assert!(!result.verified);
        assert_eq!(result.discrepancies.len(), 1);
        assert_eq!(result.discrepancies[0].field, "score");
        assert_eq!(result.discrepancies[0].original, "99.0000");
        assert_eq!(result.discrepancies[0].replayed, "10.0000");
    }

    #[tokio::test]
    async fn dropped_result_surfaces_as_length_mismatch() {
        let store = MemoryEventStore::new();
        let correlation_id = Uuid::new_v4();
        seed_history(&store, correlation_id, |results| {
            results.clear();
        })
        .await;

        let result = verify(&store, correlation_id).await.unwrap();
        assert!(!result.verified);
        let mismatch = &result.discrepancies[0];
        assert_eq!(mismatch.asset_id, "_length_mismatch");
        assert_eq!(mismatch.original, "0");
        assert_eq!(mismatch.replayed, "1");
    }
}

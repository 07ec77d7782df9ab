use crate::decimal::parse_decimal;
use crate::domain::event::{
    CalcCompletedPayload, CalcStartedPayload, CapturedAsset, EventType, InputsCapturedPayload,
    NewCalculationEvent, ScoresComputedPayload,
};
use crate::domain::market::{AssetPrice, ExchangeRates, FundamentalRatios};
use crate::scoring::engine::{score_assets, ScoringInputs};
use crate::storage::events::EventStore;
use crate::storage::portfolios::PortfolioReader;
use crate::storage::scores::{NewScore, ScoreStore};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Market data fetched exactly once per run and shared immutably by every
/// user's calculation, so the whole run scores against one snapshot.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub prices: BTreeMap<String, AssetPrice>,
    pub rates: ExchangeRates,
    pub fundamentals: Vec<FundamentalRatios>,
}

/// Expected per-user failures, returned as data rather than thrown.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScoreFailure {
    Precondition { reason: String },
    Provider { stage: String, message: String },
    Persistence { stage: String, message: String },
}

impl ScoreFailure {
    pub fn message(&self) -> &str {
        match self {
            ScoreFailure::Precondition { reason } => reason,
            ScoreFailure::Provider { message, .. } => message,
            ScoreFailure::Persistence { message, .. } => message,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserScoreOutcome {
    pub user_id: Uuid,
    pub correlation_id: Option<Uuid>,
    pub success: bool,
    pub assets_scored: usize,
    pub failure: Option<ScoreFailure>,
}

impl UserScoreOutcome {
    fn succeeded(user_id: Uuid, correlation_id: Uuid, assets_scored: usize) -> Self {
        Self {
            user_id,
            correlation_id: Some(correlation_id),
            success: true,
            assets_scored,
            failure: None,
        }
    }

    fn failed(user_id: Uuid, correlation_id: Option<Uuid>, failure: ScoreFailure) -> Self {
        Self {
            user_id,
            correlation_id,
            success: false,
            assets_scored: 0,
            failure: Some(failure),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub users_processed: usize,
    pub users_failed: usize,
    pub results: Vec<UserScoreOutcome>,
}

pub struct BatchScorer {
    events: Arc<dyn EventStore>,
    scores: Arc<dyn ScoreStore>,
    portfolios: Arc<dyn PortfolioReader>,
    batch_size: usize,
}

impl BatchScorer {
    pub fn new(
        events: Arc<dyn EventStore>,
        scores: Arc<dyn ScoreStore>,
        portfolios: Arc<dyn PortfolioReader>,
        batch_size: Option<usize>,
    ) -> Self {
        Self {
            events,
            scores,
            portfolios,
            batch_size: batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1),
        }
    }

    /// Score every user in fixed batches. Batches run sequentially; a
    /// failure at any scope is contained to that scope: user failures leave
    /// the batch running, a batch failure fails only its own users.
    pub async fn run(&self, users: &[Uuid], snapshot: &MarketSnapshot) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for batch in users.chunks(self.batch_size) {
            match self.process_batch(batch, snapshot).await {
                Ok(results) => outcome.results.extend(results),
                Err(err) => {
                    tracing::error!(batch_len = batch.len(), error = %err, "batch-level failure; failing whole batch");
                    for user_id in batch {
                        outcome.results.push(UserScoreOutcome::failed(
                            *user_id,
                            None,
                            ScoreFailure::Persistence {
                                stage: "batch-setup".to_string(),
                                message: format!("{err:#}"),
                            },
                        ));
                    }
                }
            }
        }

        outcome.users_processed = outcome.results.len();
        outcome.users_failed = outcome.results.iter().filter(|r| !r.success).count();
        outcome
    }

    async fn process_batch(
        &self,
        batch: &[Uuid],
        snapshot: &MarketSnapshot,
    ) -> Result<Vec<UserScoreOutcome>> {
        let candidates = self
            .portfolios
            .candidate_assets()
            .await
            .context("fetch candidate assets failed")?;

        let assets: Vec<CapturedAsset> = candidates
            .iter()
            .map(|c| CapturedAsset {
                asset_id: c.id,
                symbol: c.symbol.clone(),
            })
            .collect();
        let class_by_asset: BTreeMap<Uuid, Uuid> =
            candidates.iter().map(|c| (c.id, c.class_id)).collect();

        let mut results = Vec::with_capacity(batch.len());
        for user_id in batch {
            let result = self
                .score_user(*user_id, &assets, &class_by_asset, snapshot)
                .await;
            match &result {
                Ok(r) if r.success => {
                    tracing::info!(user_id = %r.user_id, assets_scored = r.assets_scored, "user scored");
                }
                Ok(r) => {
                    tracing::warn!(
                        user_id = %r.user_id,
                        error = r.failure.as_ref().map(|f| f.message()).unwrap_or_default(),
                        "user scoring failed"
                    );
                }
                Err(_) => {}
            }
            // An unexpected per-user error becomes a failed result; the loop
            // continues with the next user.
            results.push(result.unwrap_or_else(|err| {
                tracing::warn!(%user_id, error = %err, "unexpected user scoring error");
                UserScoreOutcome::failed(
                    *user_id,
                    None,
                    ScoreFailure::Persistence {
                        stage: "score-user".to_string(),
                        message: format!("{err:#}"),
                    },
                )
            }));
        }

        Ok(results)
    }

    async fn score_user(
        &self,
        user_id: Uuid,
        assets: &[CapturedAsset],
        class_by_asset: &BTreeMap<Uuid, Uuid>,
        snapshot: &MarketSnapshot,
    ) -> Result<UserScoreOutcome> {
        let started = Instant::now();

        let Some(criteria_set) = self.portfolios.active_criteria(user_id).await? else {
            return Ok(UserScoreOutcome::failed(
                user_id,
                None,
                ScoreFailure::Precondition {
                    reason: "no active criteria".to_string(),
                },
            ));
        };
        if criteria_set.is_empty() {
            return Ok(UserScoreOutcome::failed(
                user_id,
                None,
                ScoreFailure::Precondition {
                    reason: "no active criteria".to_string(),
                },
            ));
        }
        if assets.is_empty() {
            return Ok(UserScoreOutcome::failed(
                user_id,
                None,
                ScoreFailure::Precondition {
                    reason: "no assets to score".to_string(),
                },
            ));
        }

        let Some(portfolio) = self.portfolios.portfolio_for_user(user_id).await? else {
            return Ok(UserScoreOutcome::failed(
                user_id,
                None,
                ScoreFailure::Precondition {
                    reason: "no portfolio".to_string(),
                },
            ));
        };

        let correlation_id = Uuid::new_v4();

        if let Err(err) = self
            .append(
                correlation_id,
                user_id,
                EventType::CalcStarted,
                &CalcStartedPayload {
                    portfolio_id: portfolio.id,
                    criteria_version_id: criteria_set.id,
                },
            )
            .await
        {
            return Ok(UserScoreOutcome::failed(
                user_id,
                Some(correlation_id),
                ScoreFailure::Persistence {
                    stage: "calc-started".to_string(),
                    message: format!("{err:#}"),
                },
            ));
        }

        // The snapshot written here is the replay contract: scoring below
        // must read only what this payload captures.
        let captured = InputsCapturedPayload {
            criteria_version_id: criteria_set.id,
            criteria: criteria_set.criteria.clone(),
            assets: assets.to_vec(),
            fundamentals: snapshot.fundamentals.clone(),
            prices: snapshot.prices.values().cloned().collect(),
            rates: snapshot.rates.clone(),
        };
        if let Err(err) = self
            .append(correlation_id, user_id, EventType::InputsCaptured, &captured)
            .await
        {
            return Ok(UserScoreOutcome::failed(
                user_id,
                Some(correlation_id),
                ScoreFailure::Persistence {
                    stage: "inputs-captured".to_string(),
                    message: format!("{err:#}"),
                },
            ));
        }

        let inputs = ScoringInputs::from_captured(&captured);
        let results = score_assets(&inputs);

        let new_scores = match build_new_scores(&results, class_by_asset) {
            Ok(v) => v,
            Err(err) => {
                return Ok(UserScoreOutcome::failed(
                    user_id,
                    Some(correlation_id),
                    ScoreFailure::Persistence {
                        stage: "persist-scores".to_string(),
                        message: format!("{err:#}"),
                    },
                ));
            }
        };

        if let Err(err) = self
            .scores
            .upsert_latest(
                user_id,
                correlation_id,
                criteria_set.id,
                Utc::now(),
                &new_scores,
            )
            .await
        {
            return Ok(UserScoreOutcome::failed(
                user_id,
                Some(correlation_id),
                ScoreFailure::Persistence {
                    stage: "persist-scores".to_string(),
                    message: format!("{err:#}"),
                },
            ));
        }

        if let Err(err) = self
            .append(
                correlation_id,
                user_id,
                EventType::ScoresComputed,
                &ScoresComputedPayload {
                    criteria_version_id: criteria_set.id,
                    results: results.clone(),
                },
            )
            .await
        {
            return Ok(UserScoreOutcome::failed(
                user_id,
                Some(correlation_id),
                ScoreFailure::Persistence {
                    stage: "scores-computed".to_string(),
                    message: format!("{err:#}"),
                },
            ));
        }

        if let Err(err) = self
            .append(
                correlation_id,
                user_id,
                EventType::CalcCompleted,
                &CalcCompletedPayload {
                    assets_scored: results.len(),
                    duration_ms: started.elapsed().as_millis() as u64,
                },
            )
            .await
        {
            return Ok(UserScoreOutcome::failed(
                user_id,
                Some(correlation_id),
                ScoreFailure::Persistence {
                    stage: "calc-completed".to_string(),
                    message: format!("{err:#}"),
                },
            ));
        }

        Ok(UserScoreOutcome::succeeded(
            user_id,
            correlation_id,
            results.len(),
        ))
    }

    async fn append<T: Serialize>(
        &self,
        correlation_id: Uuid,
        user_id: Uuid,
        event_type: EventType,
        payload: &T,
    ) -> Result<()> {
        let payload = serde_json::to_value(payload)
            .with_context(|| format!("serialize {} payload failed", event_type.as_str()))?;
        self.events
            .append(NewCalculationEvent::new(
                correlation_id,
                user_id,
                event_type,
                payload,
            ))
            .await?;
        Ok(())
    }
}

fn build_new_scores(
    results: &[crate::domain::score::AssetScoreResult],
    class_by_asset: &BTreeMap<Uuid, Uuid>,
) -> Result<Vec<NewScore>> {
    results
        .iter()
        .map(|r| {
            let class_id = class_by_asset
                .get(&r.asset_id)
                .copied()
                .with_context(|| format!("no class for asset {}", r.asset_id))?;
            Ok(NewScore {
                asset_id: r.asset_id,
                symbol: r.symbol.clone(),
                class_id,
                score: parse_decimal(&r.score)?,
                percentage: parse_decimal(&r.percentage)?,
                breakdown: serde_json::to_value(&r.breakdown)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::criteria::{CriteriaSet, Criterion, CriterionOperator};
    use crate::domain::portfolio::{CandidateAsset, Portfolio};
    use crate::storage::memory::{MemoryEventStore, MemoryPortfolioReader, MemoryScoreStore};
    use rust_decimal_macros::dec;

    fn fixture() -> (MemoryPortfolioReader, MarketSnapshot, Vec<Uuid>) {
        let mut reader = MemoryPortfolioReader::default();

        let class_id = Uuid::new_v4();
        let asset_id = Uuid::new_v4();
        reader.candidates = vec![CandidateAsset {
            id: asset_id,
            symbol: "VOO".to_string(),
            name: "Vanguard S&P 500".to_string(),
            class_id,
            currency: "USD".to_string(),
        }];

        let users: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for (i, user_id) in users.iter().enumerate() {
            reader.portfolios.insert(
                *user_id,
                Portfolio {
                    id: Uuid::new_v4(),
                    user_id: *user_id,
                    base_currency: "USD".to_string(),
                    total_investable: dec!(1000),
                },
            );
            // User 1 (the middle one) deliberately has no criteria.
            if i != 1 {
                reader.criteria.insert(
                    *user_id,
                    CriteriaSet {
                        id: Uuid::new_v4(),
                        user_id: *user_id,
                        version: 1,
                        criteria: vec![Criterion {
                            id: Uuid::new_v4(),
                            metric: "pe_ratio".to_string(),
                            operator: CriterionOperator::Lt,
                            threshold: Some(dec!(20)),
                            threshold_high: None,
                            points: dec!(10),
                            requires_fresh: false,
                        }],
                    },
                );
            }
        }

        let snapshot = MarketSnapshot {
            prices: BTreeMap::new(),
            rates: ExchangeRates {
                base: "USD".to_string(),
                rates: BTreeMap::new(),
                fetched_at: Utc::now(),
                source: "test".to_string(),
            },
            fundamentals: vec![FundamentalRatios {
                symbol: "VOO".to_string(),
                ratios: BTreeMap::from([("pe_ratio".to_string(), dec!(15))]),
                as_of: Utc::now(),
                source: "test".to_string(),
                is_stale: false,
            }],
        };

        (reader, snapshot, users)
    }

    #[tokio::test]
    async fn one_bad_user_does_not_stop_the_batch() {
        let (reader, snapshot, users) = fixture();
        let events = Arc::new(MemoryEventStore::new());
        let scores = Arc::new(MemoryScoreStore::new());
        let scorer = BatchScorer::new(events, scores, Arc::new(reader), None);

        let outcome = scorer.run(&users, &snapshot).await;
        assert_eq!(outcome.users_processed, 3);
        assert_eq!(outcome.users_failed, 1);
        assert!(outcome.results[0].success);
        assert!(!outcome.results[1].success);
        assert!(outcome.results[2].success);
        assert!(matches!(
            outcome.results[1].failure,
            Some(ScoreFailure::Precondition { .. })
        ));
    }

    #[tokio::test]
    async fn event_sequence_is_fixed_per_user() {
        let (reader, snapshot, users) = fixture();
        let events = Arc::new(MemoryEventStore::new());
        let scores = Arc::new(MemoryScoreStore::new());
        let scorer = BatchScorer::new(events.clone(), scores, Arc::new(reader), None);

        let outcome = scorer.run(&users[..1], &snapshot).await;
        let correlation_id = outcome.results[0].correlation_id.unwrap();

        let sequence = events.get_by_correlation_id(correlation_id).await.unwrap();
        let types: Vec<_> = sequence.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                EventType::CalcStarted,
                EventType::InputsCaptured,
                EventType::ScoresComputed,
                EventType::CalcCompleted,
            ]
        );
    }

    #[tokio::test]
    async fn scores_are_upserted_with_history() {
        let (reader, snapshot, users) = fixture();
        let events = Arc::new(MemoryEventStore::new());
        let scores = Arc::new(MemoryScoreStore::new());
        let scorer = BatchScorer::new(events, scores.clone(), Arc::new(reader), None);

        // Two runs: latest is overwritten, history keeps both.
        scorer.run(&users[..1], &snapshot).await;
        scorer.run(&users[..1], &snapshot).await;

        let latest = scores.latest_for_user(users[0]).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].score, dec!(10));
        assert_eq!(scores.history_len(), 2);
    }

    #[tokio::test]
    async fn empty_candidate_universe_is_a_precondition_failure() {
        let (mut reader, snapshot, users) = fixture();
        reader.candidates.clear();
        let events = Arc::new(MemoryEventStore::new());
        let scores = Arc::new(MemoryScoreStore::new());
        let scorer = BatchScorer::new(events.clone(), scores, Arc::new(reader), None);

        let outcome = scorer.run(&users[..1], &snapshot).await;
        assert_eq!(outcome.users_failed, 1);
        // Nothing was started for the user: no stray events.
        assert!(events.is_empty());
    }
}

use crate::alerts::detector::{
    detect_drift_for_user, detect_opportunities_for_user, AlertDetectionOutcome,
};
use crate::allocation::current_allocations;
use crate::cache::warmer::{warm_recommendations, WarmOutcome};
use crate::cache::RecommendationCache;
use crate::domain::event::{
    DataRefreshedPayload, EventType, NewCalculationEvent, SYSTEM_USER_ID,
};
use crate::domain::job::{JobStatus, JobStep, NIGHTLY_JOB_TYPE};
use crate::domain::market::{AssetPrice, ExchangeRates};
use crate::providers::{ExchangeRateProvider, FundamentalsProvider, PriceProvider};
use crate::recommend::generator::{generate, AllocationPolicy, GenerationResult, GeneratorContext};
use crate::scoring::batch::{BatchOutcome, BatchScorer, MarketSnapshot};
use crate::storage::alerts::AlertStore;
use crate::storage::events::EventStore;
use crate::storage::jobs::JobStore;
use crate::storage::portfolios::PortfolioReader;
use crate::storage::recommendations::RecommendationStore;
use crate::storage::scores::ScoreStore;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Every collaborator the nightly job touches, constructed once at process
/// start and passed by interface reference. No hidden statics.
#[derive(Clone)]
pub struct JobServices {
    pub events: Arc<dyn EventStore>,
    pub scores: Arc<dyn ScoreStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub recommendations: Arc<dyn RecommendationStore>,
    pub portfolios: Arc<dyn PortfolioReader>,
    pub jobs: Arc<dyn JobStore>,
    pub cache: Arc<dyn RecommendationCache>,
    pub prices: Arc<dyn PriceProvider>,
    pub rates: Arc<dyn ExchangeRateProvider>,
    pub fundamentals: Arc<dyn FundamentalsProvider>,
}

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub base_currency: String,
    pub target_currencies: Vec<String>,
    pub batch_size: Option<usize>,
    pub production: bool,
    pub policy: AllocationPolicy,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            base_currency: "USD".to_string(),
            target_currencies: vec!["EUR".to_string(), "GBP".to_string(), "KRW".to_string()],
            batch_size: None,
            production: false,
            policy: AllocationPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedUser {
    pub user_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationOutcome {
    pub users_processed: usize,
    pub generated: usize,
    pub skipped: Vec<SkippedUser>,
    pub failures: usize,
}

#[derive(Debug, Clone)]
pub struct JobSummary {
    pub job_run_id: Uuid,
    pub correlation_id: Uuid,
    pub status: JobStatus,
    pub resumed_steps: usize,
    pub metrics: Value,
}

/// Results carried between steps. On resume, committed step rows rehydrate
/// the same fields the live execution would have filled.
#[derive(Default)]
struct StepContext {
    rates: Option<ExchangeRates>,
    users: Option<Vec<Uuid>>,
    prices: Option<Vec<AssetPrice>>,
    batch: Option<BatchOutcome>,
    opportunity: Option<AlertDetectionOutcome>,
    drift: Option<AlertDetectionOutcome>,
    generation: Option<GenerationOutcome>,
    warm: Option<WarmOutcome>,
    final_status: Option<JobStatus>,
}

impl StepContext {
    fn rehydrate(&mut self, step: JobStep, saved: Value) -> Result<()> {
        let step_name = step.name();
        let ctx = || format!("invalid checkpoint payload for step {step_name}");
        match step {
            JobStep::Setup => {}
            JobStep::FetchExchangeRates => {
                self.rates = Some(serde_json::from_value(saved).with_context(ctx)?);
            }
            JobStep::GetActiveUsers => {
                let users: UserList = serde_json::from_value(saved).with_context(ctx)?;
                self.users = Some(users.user_ids);
            }
            JobStep::FetchAssetPrices => {
                let prices: PriceList = serde_json::from_value(saved).with_context(ctx)?;
                self.prices = Some(prices.prices);
            }
            JobStep::ScorePortfolios => {
                self.batch = Some(serde_json::from_value(saved).with_context(ctx)?);
            }
            JobStep::DetectOpportunityAlerts => {
                self.opportunity = Some(serde_json::from_value(saved).with_context(ctx)?);
            }
            JobStep::DetectDriftAlerts => {
                self.drift = Some(serde_json::from_value(saved).with_context(ctx)?);
            }
            JobStep::GenerateRecommendations => {
                self.generation = Some(serde_json::from_value(saved).with_context(ctx)?);
            }
            JobStep::WarmCache => {
                self.warm = Some(serde_json::from_value(saved).with_context(ctx)?);
            }
            JobStep::Finalize => {
                let f: FinalizeRecord = serde_json::from_value(saved).with_context(ctx)?;
                self.final_status = Some(f.status);
            }
        }
        Ok(())
    }

    fn price_map(&self) -> BTreeMap<String, AssetPrice> {
        self.prices
            .iter()
            .flatten()
            .map(|p| (p.symbol.clone(), p.clone()))
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct UserList {
    user_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PriceList {
    prices: Vec<AssetPrice>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FinalizeRecord {
    status: JobStatus,
    failures: usize,
}

/// Drive the nightly pipeline as a checkpointed state machine. Each step's
/// result is committed before the next begins; re-invocation after a crash
/// resumes at the first uncommitted step. A step error fails the run but
/// leaves committed checkpoints for inspection.
pub async fn run_nightly_job(services: &JobServices, config: &JobConfig) -> Result<JobSummary> {
    let run = match services.jobs.find_resumable(NIGHTLY_JOB_TYPE).await? {
        Some(run) => {
            tracing::info!(job_run_id = %run.id, "resuming interrupted nightly run");
            run
        }
        None => {
            services
                .jobs
                .create_run(NIGHTLY_JOB_TYPE, Uuid::new_v4())
                .await
                .context("create job run failed")?
        }
    };

    let mut ctx = StepContext::default();
    let mut step_metrics = serde_json::Map::new();
    let mut resumed_steps = 0usize;

    for step in JobStep::ALL {
        if let Some(saved) = services.jobs.load_checkpoint(run.id, step.name()).await? {
            ctx.rehydrate(step, saved)?;
            resumed_steps += 1;
            tracing::info!(step = step.name(), "checkpoint found; skipping step");
            continue;
        }

        let started = Instant::now();
        let result = match execute_step(step, services, config, &run, &mut ctx).await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(step = step.name(), error = %err, "step failed; failing run");
                let metrics = json!({
                    "steps": Value::Object(step_metrics),
                    "failed_step": step.name(),
                    "error": format!("{err:#}"),
                });
                services
                    .jobs
                    .finalize_run(run.id, JobStatus::Failed, metrics)
                    .await?;
                return Err(err.context(format!("step {} failed", step.name())));
            }
        };

        services
            .jobs
            .commit_checkpoint(run.id, step.name(), result)
            .await?;
        step_metrics.insert(
            step.name().to_string(),
            json!({ "duration_ms": started.elapsed().as_millis() as u64 }),
        );
        tracing::info!(step = step.name(), elapsed_ms = started.elapsed().as_millis() as u64, "step committed");
    }

    let status = ctx
        .final_status
        .context("finalize step produced no status")?;

    Ok(JobSummary {
        job_run_id: run.id,
        correlation_id: run.correlation_id,
        status,
        resumed_steps,
        metrics: Value::Object(step_metrics),
    })
}

async fn execute_step(
    step: JobStep,
    services: &JobServices,
    config: &JobConfig,
    run: &crate::domain::job::JobRun,
    ctx: &mut StepContext,
) -> Result<Value> {
    match step {
        JobStep::Setup => {
            // A required-in-production provider left unconfigured must fail
            // here, before any user is touched.
            if config.production && services.prices.provider_name() == "noop" {
                anyhow::bail!("price provider is required in production but not configured");
            }
            Ok(json!({
                "production": config.production,
                "price_provider": services.prices.provider_name(),
                "rate_provider": services.rates.provider_name(),
            }))
        }

        JobStep::FetchExchangeRates => {
            let rates = services
                .rates
                .get_rates(&config.base_currency, &config.target_currencies)
                .await
                .context("exchange rate fetch failed")?;
            let result = serde_json::to_value(&rates)?;
            ctx.rates = Some(rates);
            Ok(result)
        }

        JobStep::GetActiveUsers => {
            let user_ids = services.portfolios.active_user_ids().await?;
            tracing::info!(users = user_ids.len(), "active users loaded");
            let result = serde_json::to_value(&UserList {
                user_ids: user_ids.clone(),
            })?;
            ctx.users = Some(user_ids);
            Ok(result)
        }

        JobStep::FetchAssetPrices => {
            let candidates = services.portfolios.candidate_assets().await?;
            let symbols: Vec<String> = candidates.iter().map(|c| c.symbol.clone()).collect();
            let prices = services
                .prices
                .get_prices(&symbols)
                .await
                .context("price fetch failed")?;

            let rates_count = ctx.rates.as_ref().map(|r| r.rates.len()).unwrap_or(0);
            let payload = DataRefreshedPayload {
                prices_fetched: prices.len(),
                rates_fetched: rates_count,
                source: services.prices.provider_name().to_string(),
            };
            services
                .events
                .append(NewCalculationEvent::new(
                    run.correlation_id,
                    SYSTEM_USER_ID,
                    EventType::DataRefreshed,
                    serde_json::to_value(&payload)?,
                ))
                .await?;

            let result = serde_json::to_value(&PriceList {
                prices: prices.clone(),
            })?;
            ctx.prices = Some(prices);
            Ok(result)
        }

        JobStep::ScorePortfolios => {
            let users = ctx.users.clone().context("users not loaded")?;
            let rates = ctx.rates.clone().context("rates not loaded")?;

            let candidates = services.portfolios.candidate_assets().await?;
            let symbols: Vec<String> = candidates.iter().map(|c| c.symbol.clone()).collect();
            let fundamentals = services
                .fundamentals
                .get_fundamentals(&symbols)
                .await
                .context("fundamentals fetch failed")?;

            let snapshot = MarketSnapshot {
                prices: ctx.price_map(),
                rates,
                fundamentals,
            };

            let scorer = BatchScorer::new(
                Arc::clone(&services.events),
                Arc::clone(&services.scores),
                Arc::clone(&services.portfolios),
                config.batch_size,
            );
            let outcome = scorer.run(&users, &snapshot).await;
            tracing::info!(
                users_processed = outcome.users_processed,
                users_failed = outcome.users_failed,
                "portfolio scoring finished"
            );
            let result = serde_json::to_value(&outcome)?;
            ctx.batch = Some(outcome);
            Ok(result)
        }

        JobStep::DetectOpportunityAlerts => {
            let users = ctx.users.clone().context("users not loaded")?;
            let mut outcome = AlertDetectionOutcome::default();

            for user_id in users {
                outcome.users_processed += 1;
                match opportunity_pass(services, user_id).await {
                    Ok(counts) => outcome.counts.absorb(counts),
                    Err(err) => {
                        tracing::warn!(%user_id, error = %err, "opportunity detection failed for user");
                        outcome.failures += 1;
                    }
                }
            }

            let result = serde_json::to_value(&outcome)?;
            ctx.opportunity = Some(outcome);
            Ok(result)
        }

        JobStep::DetectDriftAlerts => {
            let users = ctx.users.clone().context("users not loaded")?;
            let rates = ctx.rates.clone().context("rates not loaded")?;
            let prices = ctx.price_map();
            let mut outcome = AlertDetectionOutcome::default();

            for user_id in users {
                outcome.users_processed += 1;
                match drift_pass(services, user_id, &prices, &rates).await {
                    Ok(counts) => outcome.counts.absorb(counts),
                    Err(err) => {
                        tracing::warn!(%user_id, error = %err, "drift detection failed for user");
                        outcome.failures += 1;
                    }
                }
            }

            let result = serde_json::to_value(&outcome)?;
            ctx.drift = Some(outcome);
            Ok(result)
        }

        JobStep::GenerateRecommendations => {
            let users = ctx.users.clone().context("users not loaded")?;
            let rates = ctx.rates.clone().context("rates not loaded")?;
            let prices = ctx.price_map();
            let mut outcome = GenerationOutcome::default();

            for user_id in users {
                outcome.users_processed += 1;
                match generation_pass(services, config, user_id, &prices, &rates).await {
                    Ok(GenerationResult::Generated(_)) => outcome.generated += 1,
                    Ok(GenerationResult::Skipped { reason }) => {
                        outcome.skipped.push(SkippedUser { user_id, reason });
                    }
                    Err(err) => {
                        tracing::warn!(%user_id, error = %err, "recommendation generation failed for user");
                        outcome.failures += 1;
                    }
                }
            }

            tracing::info!(
                generated = outcome.generated,
                skipped = outcome.skipped.len(),
                failures = outcome.failures,
                "recommendation generation finished"
            );
            let result = serde_json::to_value(&outcome)?;
            ctx.generation = Some(outcome);
            Ok(result)
        }

        JobStep::WarmCache => {
            let users = ctx.users.clone().context("users not loaded")?;
            let mut recommendations = Vec::new();
            for user_id in &users {
                if let Some(rec) = services.recommendations.latest_for_user(*user_id).await? {
                    recommendations.push(rec);
                }
            }

            let outcome = warm_recommendations(
                Arc::clone(&services.cache),
                recommendations,
                config.batch_size,
            )
            .await;
            tracing::info!(
                users_cached = outcome.users_cached,
                cache_failures = outcome.cache_failures,
                duration_ms = outcome.duration_ms,
                "cache warm finished"
            );
            let result = serde_json::to_value(&outcome)?;
            ctx.warm = Some(outcome);
            Ok(result)
        }

        JobStep::Finalize => {
            let batch = ctx.batch.clone().unwrap_or_default();
            let opportunity = ctx.opportunity.clone().unwrap_or_default();
            let drift = ctx.drift.clone().unwrap_or_default();
            let generation = ctx.generation.clone().unwrap_or_default();
            let warm = ctx.warm.clone().unwrap_or_default();

            let failures = batch.users_failed
                + opportunity.failures
                + drift.failures
                + generation.failures
                + warm.cache_failures;
            let status = if failures == 0 {
                JobStatus::Completed
            } else {
                JobStatus::Partial
            };

            let metrics = json!({
                "scoring": {
                    "users_processed": batch.users_processed,
                    "users_failed": batch.users_failed,
                },
                "alerts": {
                    "opportunity": opportunity,
                    "drift": drift,
                },
                "recommendations": generation,
                "cache": warm,
                "failures": failures,
            });

            services
                .jobs
                .finalize_run(run.id, status, metrics)
                .await?;

            ctx.final_status = Some(status);
            Ok(serde_json::to_value(&FinalizeRecord { status, failures })?)
        }
    }
}

async fn opportunity_pass(
    services: &JobServices,
    user_id: Uuid,
) -> Result<crate::alerts::detector::DetectionCounts> {
    let scores = services.scores.latest_for_user(user_id).await?;
    let held = held_asset_ids(services, user_id).await?;
    detect_opportunities_for_user(services.alerts.as_ref(), user_id, &scores, &held).await
}

async fn drift_pass(
    services: &JobServices,
    user_id: Uuid,
    prices: &BTreeMap<String, AssetPrice>,
    rates: &ExchangeRates,
) -> Result<crate::alerts::detector::DetectionCounts> {
    let Some(portfolio) = services.portfolios.portfolio_for_user(user_id).await? else {
        return Ok(Default::default());
    };
    let holdings = services.portfolios.holdings(portfolio.id).await?;
    let targets = services.portfolios.class_targets(portfolio.id).await?;
    let allocation = current_allocations(&holdings, prices, rates);
    let prefs = services.alerts.preferences(user_id).await?;
    detect_drift_for_user(
        services.alerts.as_ref(),
        user_id,
        &targets,
        &allocation,
        &prefs,
    )
    .await
}

async fn generation_pass(
    services: &JobServices,
    config: &JobConfig,
    user_id: Uuid,
    prices: &BTreeMap<String, AssetPrice>,
    rates: &ExchangeRates,
) -> Result<GenerationResult> {
    let Some(portfolio) = services.portfolios.portfolio_for_user(user_id).await? else {
        return Ok(GenerationResult::Skipped {
            reason: "no portfolio".to_string(),
        });
    };
    let scores = services.scores.latest_for_user(user_id).await?;
    let holdings = services.portfolios.holdings(portfolio.id).await?;
    let targets = services.portfolios.class_targets(portfolio.id).await?;
    let allocation = current_allocations(&holdings, prices, rates);

    let prices_as_of = prices
        .values()
        .map(|p| p.fetched_at)
        .max()
        .unwrap_or(rates.fetched_at);

    let generator_ctx = GeneratorContext {
        portfolio: &portfolio,
        scores: &scores,
        targets: &targets,
        allocation: &allocation,
        rates,
        prices_as_of,
    };

    let result = generate(&generator_ctx, &config.policy, Utc::now());
    if let GenerationResult::Generated(rec) = &result {
        services.recommendations.insert(rec).await?;
    }
    Ok(result)
}

async fn held_asset_ids(services: &JobServices, user_id: Uuid) -> Result<HashSet<Uuid>> {
    let Some(portfolio) = services.portfolios.portfolio_for_user(user_id).await? else {
        return Ok(HashSet::new());
    };
    Ok(services
        .portfolios
        .holdings(portfolio.id)
        .await?
        .into_iter()
        .map(|h| h.asset_id)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::domain::criteria::{CriteriaSet, Criterion, CriterionOperator};
    use crate::domain::market::FundamentalRatios;
    use crate::domain::portfolio::{CandidateAsset, ClassTarget, Holding, Portfolio};
    use crate::storage::memory::{
        MemoryAlertStore, MemoryEventStore, MemoryJobStore, MemoryPortfolioReader,
        MemoryRecommendationStore, MemoryScoreStore,
    };
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct StubPriceProvider {
        prices: Vec<AssetPrice>,
    }

    #[async_trait::async_trait]
    impl PriceProvider for StubPriceProvider {
        fn provider_name(&self) -> &'static str {
            "stub"
        }

        async fn get_prices(&self, _symbols: &[String]) -> Result<Vec<AssetPrice>> {
            Ok(self.prices.clone())
        }
    }

    struct StubRateProvider {
        fail: bool,
    }

    #[async_trait::async_trait]
    impl ExchangeRateProvider for StubRateProvider {
        fn provider_name(&self) -> &'static str {
            "stub"
        }

        async fn get_rates(&self, base: &str, _targets: &[String]) -> Result<ExchangeRates> {
            anyhow::ensure!(!self.fail, "rate provider unavailable");
            Ok(ExchangeRates {
                base: base.to_string(),
                rates: Default::default(),
                fetched_at: Utc::now(),
                source: "stub".to_string(),
            })
        }
    }

    struct StubFundamentalsProvider {
        ratios: Vec<FundamentalRatios>,
    }

    #[async_trait::async_trait]
    impl FundamentalsProvider for StubFundamentalsProvider {
        fn provider_name(&self) -> &'static str {
            "stub"
        }

        async fn get_fundamentals(&self, _symbols: &[String]) -> Result<Vec<FundamentalRatios>> {
            Ok(self.ratios.clone())
        }
    }

    struct Fixture {
        services: JobServices,
        jobs: Arc<MemoryJobStore>,
        alerts: Arc<MemoryAlertStore>,
        recommendations: Arc<MemoryRecommendationStore>,
        cache: Arc<MemoryCache>,
    }

    fn fixture(user_count: usize, break_user: Option<usize>, fail_rates: bool) -> Fixture {
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

        for i in 0..user_count {
            let user_id = Uuid::new_v4();
            let portfolio_id = Uuid::new_v4();
            reader.users.push(user_id);
            reader.portfolios.insert(
                user_id,
                Portfolio {
                    id: portfolio_id,
                    user_id,
                    base_currency: "USD".to_string(),
                    total_investable: dec!(1000),
                },
            );
            reader.holdings.insert(
                portfolio_id,
                vec![Holding {
                    portfolio_id,
                    asset_id,
                    symbol: "VOO".to_string(),
                    class_id,
                    quantity: dec!(2),
                    currency: "USD".to_string(),
                }],
            );
            reader.targets.insert(
                portfolio_id,
                vec![ClassTarget {
                    class_id,
                    class_name: "Equities".to_string(),
                    target_min: dec!(0),
                    target_max: dec!(100),
                }],
            );
            if Some(i) != break_user {
                reader.criteria.insert(
                    user_id,
                    CriteriaSet {
                        id: Uuid::new_v4(),
                        user_id,
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

        let jobs = Arc::new(MemoryJobStore::new());
        let alerts = Arc::new(MemoryAlertStore::new());
        let recommendations = Arc::new(MemoryRecommendationStore::new());
        let cache = Arc::new(MemoryCache::new());

        let services = JobServices {
            events: Arc::new(MemoryEventStore::new()),
            scores: Arc::new(MemoryScoreStore::new()),
            alerts: alerts.clone(),
            recommendations: recommendations.clone(),
            portfolios: Arc::new(reader),
            jobs: jobs.clone(),
            cache: cache.clone(),
            prices: Arc::new(StubPriceProvider {
                prices: vec![AssetPrice {
                    symbol: "VOO".to_string(),
                    price: dec!(400),
                    currency: "USD".to_string(),
                    fetched_at: Utc::now(),
                    source: "stub".to_string(),
                }],
            }),
            rates: Arc::new(StubRateProvider { fail: fail_rates }),
            fundamentals: Arc::new(StubFundamentalsProvider {
                ratios: vec![FundamentalRatios {
                    symbol: "VOO".to_string(),
                    ratios: [("pe_ratio".to_string(), Decimal::from(15))]
                        .into_iter()
                        .collect(),
                    as_of: Utc::now(),
                    source: "stub".to_string(),
                    is_stale: false,
                }],
            }),
        };

        Fixture {
            services,
            jobs,
            alerts,
            recommendations,
            cache,
        }
    }

    #[tokio::test]
    async fn clean_run_completes_with_all_checkpoints() {
        let f = fixture(2, None, false);
        let summary = run_nightly_job(&f.services, &JobConfig::default())
            .await
            .unwrap();

        assert_eq!(summary.status, JobStatus::Completed);
        assert_eq!(summary.resumed_steps, 0);
        assert_eq!(f.jobs.checkpoint_count(summary.job_run_id), 10);
        assert_eq!(f.recommendations.all().len(), 2);
        assert_eq!(f.cache.len(), 2);

        let run = f.jobs.runs().into_iter().next().unwrap();
        assert_eq!(run.status, JobStatus::Completed);
        assert!(run.completed_at.is_some());
    }

    #[tokio::test]
    async fn user_failures_finalize_as_partial() {
        let f = fixture(3, Some(1), false);
        let summary = run_nightly_job(&f.services, &JobConfig::default())
            .await
            .unwrap();

        assert_eq!(summary.status, JobStatus::Partial);
        let run = f.jobs.runs().into_iter().next().unwrap();
        assert_eq!(run.status, JobStatus::Partial);
        assert_eq!(run.metrics["scoring"]["users_failed"], 1);
    }

    #[tokio::test]
    async fn failing_step_fails_the_run_but_keeps_checkpoints() {
        let f = fixture(1, None, true);
        let err = run_nightly_job(&f.services, &JobConfig::default()).await;
        assert!(err.is_err());

        let run = f.jobs.runs().into_iter().next().unwrap();
        assert_eq!(run.status, JobStatus::Failed);
        // Setup committed before the rate fetch blew up.
        assert_eq!(f.jobs.checkpoint_count(run.id), 1);
        assert_eq!(run.metrics["failed_step"], "fetch-exchange-rates");
    }

    #[tokio::test]
    async fn resume_skips_committed_steps() {
        // First invocation dies at fetch-exchange-rates (after committing
        // setup).
        let f = fixture(1, None, true);
        run_nightly_job(&f.services, &JobConfig::default())
            .await
            .unwrap_err();

        // The run is final; a fresh invocation starts a new run. To exercise
        // resume, reopen a started run with the same checkpoints.
        let crashed = f.jobs.runs().into_iter().next().unwrap();
        let resumable = f
            .jobs
            .create_run(NIGHTLY_JOB_TYPE, Uuid::new_v4())
            .await
            .unwrap();
        let setup = f
            .jobs
            .load_checkpoint(crashed.id, JobStep::Setup.name())
            .await
            .unwrap()
            .unwrap();
        f.jobs
            .commit_checkpoint(resumable.id, JobStep::Setup.name(), setup)
            .await
            .unwrap();

        // Second invocation with a healthy rate provider resumes that run.
        let healthy = fixture(1, None, false);
        let services = JobServices {
            jobs: f.jobs.clone(),
            ..healthy.services
        };
        let summary = run_nightly_job(&services, &JobConfig::default())
            .await
            .unwrap();

        assert_eq!(summary.job_run_id, resumable.id);
        assert_eq!(summary.resumed_steps, 1);
        assert_eq!(summary.status, JobStatus::Completed);
        assert_eq!(f.jobs.checkpoint_count(resumable.id), 10);
    }

    #[tokio::test]
    async fn opportunity_and_drift_outcomes_land_in_metrics() {
        let f = fixture(1, None, false);
        let summary = run_nightly_job(&f.services, &JobConfig::default())
            .await
            .unwrap();

        let run = f.jobs.runs().into_iter().next().unwrap();
        assert_eq!(run.metrics["alerts"]["opportunity"]["users_processed"], 1);
        assert_eq!(run.metrics["alerts"]["drift"]["users_processed"], 1);
        assert_eq!(summary.status, JobStatus::Completed);
        // Single-asset class fully in range: no alerts raised.
        assert!(f.alerts.all().is_empty());
    }
}

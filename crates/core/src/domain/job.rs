use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const NIGHTLY_JOB_TYPE: &str = "nightly-scoring";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Started,
    Completed,
    Partial,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Started => "started",
            JobStatus::Completed => "completed",
            JobStatus::Partial => "partial",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "started" => Ok(JobStatus::Started),
            "completed" => Ok(JobStatus::Completed),
            "partial" => Ok(JobStatus::Partial),
            "failed" => Ok(JobStatus::Failed),
            other => anyhow::bail!("unknown job status: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: Uuid,
    pub job_type: String,
    pub correlation_id: Uuid,
    pub status: JobStatus,
    pub metrics: Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The nightly pipeline's checkpointed steps, in execution order. Each step
/// commits its result before the next begins; resume skips committed steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStep {
    Setup,
    FetchExchangeRates,
    GetActiveUsers,
    FetchAssetPrices,
    ScorePortfolios,
    DetectOpportunityAlerts,
    DetectDriftAlerts,
    GenerateRecommendations,
    WarmCache,
    Finalize,
}

impl JobStep {
    pub const ALL: [JobStep; 10] = [
        JobStep::Setup,
        JobStep::FetchExchangeRates,
        JobStep::GetActiveUsers,
        JobStep::FetchAssetPrices,
        JobStep::ScorePortfolios,
        JobStep::DetectOpportunityAlerts,
        JobStep::DetectDriftAlerts,
        JobStep::GenerateRecommendations,
        JobStep::WarmCache,
        JobStep::Finalize,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            JobStep::Setup => "setup",
            JobStep::FetchExchangeRates => "fetch-exchange-rates",
            JobStep::GetActiveUsers => "get-active-users",
            JobStep::FetchAssetPrices => "fetch-asset-prices",
            JobStep::ScorePortfolios => "score-portfolios",
            JobStep::DetectOpportunityAlerts => "detect-opportunity-alerts",
            JobStep::DetectDriftAlerts => "detect-drift-alerts",
            JobStep::GenerateRecommendations => "generate-recommendations",
            JobStep::WarmCache => "warm-cache",
            JobStep::Finalize => "finalize",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCheckpoint {
    pub job_run_id: Uuid,
    pub step_name: String,
    pub result: Value,
    pub committed_at: DateTime<Utc>,
}

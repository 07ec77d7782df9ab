//! In-memory store implementations backing unit tests and dry runs. They
//! mirror the Postgres stores' observable behavior, including ordering and
//! the dedup semantics the detectors rely on.

use crate::domain::alert::{Alert, AlertPreferences, AlertSeverity, AlertType};
use crate::domain::criteria::CriteriaSet;
use crate::domain::event::{CalculationEvent, EventType, NewCalculationEvent};
use crate::domain::job::{JobRun, JobStatus};
use crate::domain::portfolio::{CandidateAsset, ClassTarget, Holding, Portfolio};
use crate::domain::recommendation::GeneratedRecommendation;
use crate::domain::score::StoredScore;
use crate::storage::alerts::{AlertStore, NewAlert};
use crate::storage::events::EventStore;
use crate::storage::jobs::JobStore;
use crate::storage::portfolios::PortfolioReader;
use crate::storage::recommendations::RecommendationStore;
use crate::storage::scores::{NewScore, ScoreStore};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: Mutex<Vec<CalculationEvent>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<CalculationEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, event: NewCalculationEvent) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.events.lock().unwrap().push(CalculationEvent {
            id,
            correlation_id: event.correlation_id,
            user_id: event.user_id,
            event_type: event.event_type,
            payload: event.payload,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn get_by_correlation_id(&self, correlation_id: Uuid) -> Result<Vec<CalculationEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.correlation_id == correlation_id)
            .cloned()
            .collect())
    }

    async fn get_by_user_id(&self, user_id: Uuid) -> Result<Vec<CalculationEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_by_event_type(&self, event_type: EventType) -> Result<Vec<CalculationEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryScoreStore {
    latest: Mutex<HashMap<(Uuid, Uuid), StoredScore>>,
    history_len: Mutex<usize>,
}

impl MemoryScoreStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history_len(&self) -> usize {
        *self.history_len.lock().unwrap()
    }

    /// Test seeding helper.
    pub fn put(&self, score: StoredScore) {
        self.latest
            .lock()
            .unwrap()
            .insert((score.user_id, score.asset_id), score);
    }
}

#[async_trait::async_trait]
impl ScoreStore for MemoryScoreStore {
    async fn upsert_latest(
        &self,
        user_id: Uuid,
        correlation_id: Uuid,
        criteria_version_id: Uuid,
        computed_at: DateTime<Utc>,
        scores: &[NewScore],
    ) -> Result<u64> {
        anyhow::ensure!(!scores.is_empty(), "scores must be non-empty");
        let mut latest = self.latest.lock().unwrap();
        for s in scores {
            latest.insert(
                (user_id, s.asset_id),
                StoredScore {
                    user_id,
                    asset_id: s.asset_id,
                    symbol: s.symbol.clone(),
                    class_id: s.class_id,
                    score: s.score,
                    percentage: s.percentage,
                    correlation_id,
                    criteria_version_id,
                    computed_at,
                },
            );
        }
        *self.history_len.lock().unwrap() += scores.len();
        Ok(scores.len() as u64)
    }

    async fn latest_for_user(&self, user_id: Uuid) -> Result<Vec<StoredScore>> {
        let mut out: Vec<StoredScore> = self
            .latest
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(out)
    }
}

#[derive(Debug, Default)]
pub struct MemoryAlertStore {
    alerts: Mutex<Vec<Alert>>,
    preferences: Mutex<HashMap<Uuid, AlertPreferences>>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn set_preferences(&self, prefs: AlertPreferences) {
        self.preferences
            .lock()
            .unwrap()
            .insert(prefs.user_id, prefs);
    }
}

#[async_trait::async_trait]
impl AlertStore for MemoryAlertStore {
    async fn find_active(
        &self,
        user_id: Uuid,
        alert_type: AlertType,
        subject_key: &str,
    ) -> Result<Option<Alert>> {
        Ok(self
            .alerts
            .lock()
            .unwrap()
            .iter()
            .find(|a| {
                a.user_id == user_id
                    && a.alert_type == alert_type
                    && a.subject_key == subject_key
                    && !a.is_dismissed
            })
            .cloned())
    }

    async fn active_for_user(&self, user_id: Uuid, alert_type: AlertType) -> Result<Vec<Alert>> {
        Ok(self
            .alerts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.user_id == user_id && a.alert_type == alert_type && !a.is_dismissed)
            .cloned()
            .collect())
    }

    async fn insert(&self, alert: NewAlert) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        self.alerts.lock().unwrap().push(Alert {
            id,
            user_id: alert.user_id,
            alert_type: alert.alert_type,
            severity: alert.severity,
            subject_key: alert.subject_key,
            title: alert.title,
            message: alert.message,
            metadata: alert.metadata,
            is_read: false,
            is_dismissed: false,
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn update_content(
        &self,
        id: Uuid,
        severity: AlertSeverity,
        title: &str,
        message: &str,
        metadata: Value,
    ) -> Result<()> {
        let mut alerts = self.alerts.lock().unwrap();
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| anyhow::anyhow!("alert {id} not found"))?;
        alert.severity = severity;
        alert.title = title.to_string();
        alert.message = message.to_string();
        alert.metadata = metadata;
        alert.updated_at = Utc::now();
        Ok(())
    }

    async fn dismiss(&self, id: Uuid) -> Result<()> {
        let mut alerts = self.alerts.lock().unwrap();
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| anyhow::anyhow!("alert {id} not found"))?;
        alert.is_dismissed = true;
        alert.updated_at = Utc::now();
        Ok(())
    }

    async fn preferences(&self, user_id: Uuid) -> Result<AlertPreferences> {
        Ok(self
            .preferences
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| AlertPreferences::defaults_for(user_id)))
    }
}

#[derive(Debug, Default)]
pub struct MemoryRecommendationStore {
    rows: Mutex<Vec<GeneratedRecommendation>>,
}

impl MemoryRecommendationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<GeneratedRecommendation> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RecommendationStore for MemoryRecommendationStore {
    async fn insert(&self, rec: &GeneratedRecommendation) -> Result<Uuid> {
        self.rows.lock().unwrap().push(rec.clone());
        Ok(Uuid::new_v4())
    }

    async fn latest_for_user(&self, user_id: Uuid) -> Result<Option<GeneratedRecommendation>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user_id == user_id)
            .max_by_key(|r| r.generated_at)
            .cloned())
    }
}

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    runs: Mutex<Vec<JobRun>>,
    checkpoints: Mutex<HashMap<(Uuid, String), Value>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> Vec<JobRun> {
        self.runs.lock().unwrap().clone()
    }

    pub fn checkpoint_count(&self, run_id: Uuid) -> usize {
        self.checkpoints
            .lock()
            .unwrap()
            .keys()
            .filter(|(id, _)| *id == run_id)
            .count()
    }
}

#[async_trait::async_trait]
impl JobStore for MemoryJobStore {
    async fn create_run(&self, job_type: &str, correlation_id: Uuid) -> Result<JobRun> {
        let run = JobRun {
            id: Uuid::new_v4(),
            job_type: job_type.to_string(),
            correlation_id,
            status: JobStatus::Started,
            metrics: Value::Object(Default::default()),
            started_at: Utc::now(),
            completed_at: None,
        };
        self.runs.lock().unwrap().push(run.clone());
        Ok(run)
    }

    async fn find_resumable(&self, job_type: &str) -> Result<Option<JobRun>> {
        Ok(self
            .runs
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.job_type == job_type && r.status == JobStatus::Started)
            .max_by_key(|r| r.started_at)
            .cloned())
    }

    async fn latest_run(&self, job_type: &str) -> Result<Option<JobRun>> {
        Ok(self
            .runs
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.job_type == job_type)
            .max_by_key(|r| r.started_at)
            .cloned())
    }

    async fn finalize_run(&self, run_id: Uuid, status: JobStatus, metrics: Value) -> Result<()> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| anyhow::anyhow!("job run {run_id} not found"))?;
        run.status = status;
        run.metrics = metrics;
        run.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn load_checkpoint(&self, run_id: Uuid, step_name: &str) -> Result<Option<Value>> {
        Ok(self
            .checkpoints
            .lock()
            .unwrap()
            .get(&(run_id, step_name.to_string()))
            .cloned())
    }

    async fn commit_checkpoint(&self, run_id: Uuid, step_name: &str, result: Value) -> Result<()> {
        let mut checkpoints = self.checkpoints.lock().unwrap();
        let key = (run_id, step_name.to_string());
        anyhow::ensure!(
            !checkpoints.contains_key(&key),
            "checkpoint already committed for step {step_name}"
        );
        checkpoints.insert(key, result);
        Ok(())
    }
}

/// Fixed read-side fixture; populate the public fields and hand it to the
/// pipeline.
#[derive(Debug, Default, Clone)]
pub struct MemoryPortfolioReader {
    pub users: Vec<Uuid>,
    pub portfolios: HashMap<Uuid, Portfolio>,
    pub holdings: HashMap<Uuid, Vec<Holding>>,
    pub criteria: HashMap<Uuid, CriteriaSet>,
    pub candidates: Vec<CandidateAsset>,
    pub targets: HashMap<Uuid, Vec<ClassTarget>>,
}

#[async_trait::async_trait]
impl PortfolioReader for MemoryPortfolioReader {
    async fn active_user_ids(&self) -> Result<Vec<Uuid>> {
        Ok(self.users.clone())
    }

    async fn portfolio_for_user(&self, user_id: Uuid) -> Result<Option<Portfolio>> {
        Ok(self.portfolios.get(&user_id).cloned())
    }

    async fn holdings(&self, portfolio_id: Uuid) -> Result<Vec<Holding>> {
        Ok(self.holdings.get(&portfolio_id).cloned().unwrap_or_default())
    }

    async fn active_criteria(&self, user_id: Uuid) -> Result<Option<CriteriaSet>> {
        Ok(self.criteria.get(&user_id).cloned())
    }

    async fn candidate_assets(&self) -> Result<Vec<CandidateAsset>> {
        Ok(self.candidates.clone())
    }

    async fn class_targets(&self, portfolio_id: Uuid) -> Result<Vec<ClassTarget>> {
        Ok(self.targets.get(&portfolio_id).cloned().unwrap_or_default())
    }
}

use crate::domain::job::{JobRun, JobStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Job runs and their per-step checkpoints. A step's result row is the
/// commit point: resume skips any step whose row exists.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    async fn create_run(&self, job_type: &str, correlation_id: Uuid) -> Result<JobRun>;

    /// The most recent run still in `started`, if any: the run a crashed
    /// invocation left behind.
    async fn find_resumable(&self, job_type: &str) -> Result<Option<JobRun>>;

    async fn latest_run(&self, job_type: &str) -> Result<Option<JobRun>>;

    async fn finalize_run(&self, run_id: Uuid, status: JobStatus, metrics: Value) -> Result<()>;

    async fn load_checkpoint(&self, run_id: Uuid, step_name: &str) -> Result<Option<Value>>;

    async fn commit_checkpoint(&self, run_id: Uuid, step_name: &str, result: Value) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: sqlx::PgPool,
}

impl PgJobStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

type JobRunRow = (
    Uuid,
    String,
    Uuid,
    String,
    Value,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

fn row_into_run(row: JobRunRow) -> Result<JobRun> {
    let (id, job_type, correlation_id, status, metrics, started_at, completed_at) = row;
    Ok(JobRun {
        id,
        job_type,
        correlation_id,
        status: JobStatus::parse(&status)?,
        metrics,
        started_at,
        completed_at,
    })
}

const JOB_RUN_COLUMNS: &str =
    "id, job_type, correlation_id, status, metrics, started_at, completed_at";

#[async_trait::async_trait]
impl JobStore for PgJobStore {
    async fn create_run(&self, job_type: &str, correlation_id: Uuid) -> Result<JobRun> {
        let id = Uuid::new_v4();
        let started_at = Utc::now();

        sqlx::query(
            "INSERT INTO job_runs (id, job_type, correlation_id, status, metrics, started_at) \
             VALUES ($1, $2, $3, 'started', '{}'::jsonb, $4)",
        )
        .bind(id)
        .bind(job_type)
        .bind(correlation_id)
        .bind(started_at)
        .execute(&self.pool)
        .await
        .context("insert job_runs failed")?;

        Ok(JobRun {
            id,
            job_type: job_type.to_string(),
            correlation_id,
            status: JobStatus::Started,
            metrics: Value::Object(Default::default()),
            started_at,
            completed_at: None,
        })
    }

    async fn find_resumable(&self, job_type: &str) -> Result<Option<JobRun>> {
        let row = sqlx::query_as::<_, JobRunRow>(&format!(
            "SELECT {JOB_RUN_COLUMNS} FROM job_runs \
             WHERE job_type = $1 AND status = 'started' \
             ORDER BY started_at DESC \
             LIMIT 1"
        ))
        .bind(job_type)
        .fetch_optional(&self.pool)
        .await
        .context("select resumable job_runs failed")?;

        row.map(row_into_run).transpose()
    }

    async fn latest_run(&self, job_type: &str) -> Result<Option<JobRun>> {
        let row = sqlx::query_as::<_, JobRunRow>(&format!(
            "SELECT {JOB_RUN_COLUMNS} FROM job_runs \
             WHERE job_type = $1 \
             ORDER BY started_at DESC \
             LIMIT 1"
        ))
        .bind(job_type)
        .fetch_optional(&self.pool)
        .await
        .context("select latest job_runs failed")?;

        row.map(row_into_run).transpose()
    }

    async fn finalize_run(&self, run_id: Uuid, status: JobStatus, metrics: Value) -> Result<()> {
        sqlx::query(
            "UPDATE job_runs SET status = $2, metrics = $3, completed_at = $4 WHERE id = $1",
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(&metrics)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("finalize job_runs failed")?;

        Ok(())
    }

    async fn load_checkpoint(&self, run_id: Uuid, step_name: &str) -> Result<Option<Value>> {
        let row: Option<(Value,)> = sqlx::query_as(
            "SELECT result FROM job_checkpoints WHERE job_run_id = $1 AND step_name = $2",
        )
        .bind(run_id)
        .bind(step_name)
        .fetch_optional(&self.pool)
        .await
        .context("select job_checkpoints failed")?;

        Ok(row.map(|(result,)| result))
    }

    async fn commit_checkpoint(&self, run_id: Uuid, step_name: &str, result: Value) -> Result<()> {
        // Committing twice for the same step would mean two executions of a
        // checkpointed step; the primary key makes that loud.
        sqlx::query(
            "INSERT INTO job_checkpoints (job_run_id, step_name, result, committed_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(run_id)
        .bind(step_name)
        .bind(&result)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .with_context(|| format!("commit checkpoint failed (step={step_name})"))?;

        Ok(())
    }
}

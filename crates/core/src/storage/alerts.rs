use crate::domain::alert::{Alert, AlertFrequency, AlertPreferences, AlertSeverity, AlertType};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewAlert {
    pub user_id: Uuid,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub subject_key: String,
    pub title: String,
    pub message: String,
    pub metadata: Value,
}

#[async_trait::async_trait]
pub trait AlertStore: Send + Sync {
    /// The single non-dismissed alert for this subject, if any.
    async fn find_active(
        &self,
        user_id: Uuid,
        alert_type: AlertType,
        subject_key: &str,
    ) -> Result<Option<Alert>>;

    async fn active_for_user(&self, user_id: Uuid, alert_type: AlertType) -> Result<Vec<Alert>>;

    async fn insert(&self, alert: NewAlert) -> Result<Uuid>;

    async fn update_content(
        &self,
        id: Uuid,
        severity: AlertSeverity,
        title: &str,
        message: &str,
        metadata: Value,
    ) -> Result<()>;

    async fn dismiss(&self, id: Uuid) -> Result<()>;

    /// Stored preferences, or the defaults when the user never saved any.
    async fn preferences(&self, user_id: Uuid) -> Result<AlertPreferences>;
}

#[derive(Debug, Clone)]
pub struct PgAlertStore {
    pool: sqlx::PgPool,
}

impl PgAlertStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

type AlertRow = (
    Uuid,
    Uuid,
    String,
    String,
    String,
    String,
    String,
    Value,
    bool,
    bool,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn row_into_alert(row: AlertRow) -> Result<Alert> {
    let (
        id,
        user_id,
        alert_type,
        severity,
        subject_key,
        title,
        message,
        metadata,
        is_read,
        is_dismissed,
        created_at,
        updated_at,
    ) = row;

    let alert_type = match alert_type.as_str() {
        "opportunity" => AlertType::Opportunity,
        "allocation_drift" => AlertType::AllocationDrift,
        "system" => AlertType::System,
        other => anyhow::bail!("unknown alert type: {other}"),
    };
    let severity = match severity.as_str() {
        "info" => AlertSeverity::Info,
        "warning" => AlertSeverity::Warning,
        "critical" => AlertSeverity::Critical,
        other => anyhow::bail!("unknown alert severity: {other}"),
    };

    Ok(Alert {
        id,
        user_id,
        alert_type,
        severity,
        subject_key,
        title,
        message,
        metadata,
        is_read,
        is_dismissed,
        created_at,
        updated_at,
    })
}

const ALERT_COLUMNS: &str = "id, user_id, alert_type, severity, subject_key, title, message, \
                             metadata, is_read, is_dismissed, created_at, updated_at";

#[async_trait::async_trait]
impl AlertStore for PgAlertStore {
    async fn find_active(
        &self,
        user_id: Uuid,
        alert_type: AlertType,
        subject_key: &str,
    ) -> Result<Option<Alert>> {
        let row = sqlx::query_as::<_, AlertRow>(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts \
             WHERE user_id = $1 AND alert_type = $2 AND subject_key = $3 AND NOT is_dismissed \
             ORDER BY created_at DESC \
             LIMIT 1"
        ))
        .bind(user_id)
        .bind(alert_type.as_str())
        .bind(subject_key)
        .fetch_optional(&self.pool)
        .await
        .context("select active alert failed")?;

        row.map(row_into_alert).transpose()
    }

    async fn active_for_user(&self, user_id: Uuid, alert_type: AlertType) -> Result<Vec<Alert>> {
        let rows = sqlx::query_as::<_, AlertRow>(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts \
             WHERE user_id = $1 AND alert_type = $2 AND NOT is_dismissed \
             ORDER BY created_at ASC"
        ))
        .bind(user_id)
        .bind(alert_type.as_str())
        .fetch_all(&self.pool)
        .await
        .context("select active alerts for user failed")?;

        rows.into_iter().map(row_into_alert).collect()
    }

    async fn insert(&self, alert: NewAlert) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO alerts \
             (id, user_id, alert_type, severity, subject_key, title, message, metadata, is_read, is_dismissed, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, FALSE, $9, $9)",
        )
        .bind(id)
        .bind(alert.user_id)
        .bind(alert.alert_type.as_str())
        .bind(alert.severity.as_str())
        .bind(&alert.subject_key)
        .bind(&alert.title)
        .bind(&alert.message)
        .bind(&alert.metadata)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("insert alert failed")?;

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
        sqlx::query(
            "UPDATE alerts \
             SET severity = $2, title = $3, message = $4, metadata = $5, updated_at = $6 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(severity.as_str())
        .bind(title)
        .bind(message)
        .bind(&metadata)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("update alert failed")?;

        Ok(())
    }

    async fn dismiss(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE alerts SET is_dismissed = TRUE, updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .context("dismiss alert failed")?;

        Ok(())
    }

    async fn preferences(&self, user_id: Uuid) -> Result<AlertPreferences> {
        let row = sqlx::query_as::<_, (bool, bool, Decimal, String, bool)>(
            "SELECT opportunity_alerts_enabled, drift_alerts_enabled, drift_threshold, alert_frequency, email_notifications \
             FROM alert_preferences \
             WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("select alert_preferences failed")?;

        let Some((
            opportunity_alerts_enabled,
            drift_alerts_enabled,
            drift_threshold,
            alert_frequency,
            email_notifications,
        )) = row
        else {
            return Ok(AlertPreferences::defaults_for(user_id));
        };

        let alert_frequency = match alert_frequency.as_str() {
            "weekly" => AlertFrequency::Weekly,
            _ => AlertFrequency::Daily,
        };

        Ok(AlertPreferences {
            user_id,
            opportunity_alerts_enabled,
            drift_alerts_enabled,
            drift_threshold,
            alert_frequency,
            email_notifications,
        })
    }
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Opportunity,
    AllocationDrift,
    System,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Opportunity => "opportunity",
            AlertType::AllocationDrift => "allocation_drift",
            AlertType::System => "system",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub user_id: Uuid,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    /// Dedup key: at most one non-dismissed alert per (user, type, subject).
    pub subject_key: String,
    pub title: String,
    pub message: String,
    pub metadata: Value,
    pub is_read: bool,
    pub is_dismissed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertFrequency {
    Daily,
    Weekly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPreferences {
    pub user_id: Uuid,
    pub opportunity_alerts_enabled: bool,
    pub drift_alerts_enabled: bool,
    /// Minimum percentage-point breach of the target range before a drift
    /// alert fires.
    pub drift_threshold: Decimal,
    pub alert_frequency: AlertFrequency,
    pub email_notifications: bool,
}

impl AlertPreferences {
    pub fn defaults_for(user_id: Uuid) -> Self {
        Self {
            user_id,
            opportunity_alerts_enabled: true,
            drift_alerts_enabled: true,
            drift_threshold: Decimal::from(5),
            alert_frequency: AlertFrequency::Daily,
            email_notifications: false,
        }
    }
}

use crate::domain::event::{CalculationEvent, EventType, NewCalculationEvent};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Append-only calculation audit log. No update or delete exists here;
/// corrections are appended as new events. Persistence failures propagate to
/// the caller; losing the audit trail is never silent.
#[async_trait::async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, event: NewCalculationEvent) -> Result<Uuid>;

    async fn get_by_correlation_id(&self, correlation_id: Uuid) -> Result<Vec<CalculationEvent>>;

    async fn get_by_user_id(&self, user_id: Uuid) -> Result<Vec<CalculationEvent>>;

    async fn get_by_event_type(&self, event_type: EventType) -> Result<Vec<CalculationEvent>>;
}

#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: sqlx::PgPool,
}

impl PgEventStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

type EventRow = (Uuid, Uuid, Uuid, String, Value, DateTime<Utc>);

fn row_into_event(row: EventRow) -> Result<CalculationEvent> {
    let (id, correlation_id, user_id, event_type, payload, created_at) = row;
    Ok(CalculationEvent {
        id,
        correlation_id,
        user_id,
        event_type: EventType::parse(&event_type)?,
        payload,
        created_at,
    })
}

#[async_trait::async_trait]
impl EventStore for PgEventStore {
    async fn append(&self, event: NewCalculationEvent) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let created_at = Utc::now();

        sqlx::query(
            "INSERT INTO calculation_events (id, correlation_id, user_id, event_type, payload, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(id)
        .bind(event.correlation_id)
        .bind(event.user_id)
        .bind(event.event_type.as_str())
        .bind(&event.payload)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .with_context(|| {
            format!(
                "insert calculation_events failed (type={}, correlation_id={})",
                event.event_type.as_str(),
                event.correlation_id
            )
        })?;

        Ok(id)
    }

    async fn get_by_correlation_id(&self, correlation_id: Uuid) -> Result<Vec<CalculationEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT id, correlation_id, user_id, event_type, payload, created_at \
             FROM calculation_events \
             WHERE correlation_id = $1 \
             ORDER BY created_at ASC, id ASC",
        )
        .bind(correlation_id)
        .fetch_all(&self.pool)
        .await
        .context("select calculation_events by correlation_id failed")?;

        rows.into_iter().map(row_into_event).collect()
    }

    async fn get_by_user_id(&self, user_id: Uuid) -> Result<Vec<CalculationEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT id, correlation_id, user_id, event_type, payload, created_at \
             FROM calculation_events \
             WHERE user_id = $1 \
             ORDER BY created_at ASC, id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("select calculation_events by user_id failed")?;

        rows.into_iter().map(row_into_event).collect()
    }

    async fn get_by_event_type(&self, event_type: EventType) -> Result<Vec<CalculationEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT id, correlation_id, user_id, event_type, payload, created_at \
             FROM calculation_events \
             WHERE event_type = $1 \
             ORDER BY created_at ASC, id ASC",
        )
        .bind(event_type.as_str())
        .fetch_all(&self.pool)
        .await
        .context("select calculation_events by event_type failed")?;

        rows.into_iter().map(row_into_event).collect()
    }
}

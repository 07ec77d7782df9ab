use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use folio_core::decimal::parse_decimal;
use folio_core::domain::alert::{Alert, AlertType};
use folio_core::domain::job::{JobRun, NIGHTLY_JOB_TYPE};
use folio_core::domain::recommendation::GeneratedRecommendation;
use folio_core::jobs::VerifyResult;
use folio_core::storage::alerts::{AlertStore, PgAlertStore};
use folio_core::storage::events::PgEventStore;
use folio_core::storage::jobs::{JobStore, PgJobStore};
use folio_core::storage::recommendations::{PgRecommendationStore, RecommendationStore};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = folio_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match folio_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let state = AppState { pool };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/jobs/latest", get(get_latest_job_run))
        .route(
            "/users/:user_id/recommendations/latest",
            get(get_latest_recommendation),
        )
        .route("/users/:user_id/alerts", get(get_active_alerts))
        .route("/verify/:correlation_id", get(get_verification))
        .route("/investments", post(post_investment))
        .route(
            "/investments/:investment_id/confirm",
            post(post_investment_confirmation),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Clone)]
struct AppState {
    pool: Option<PgPool>,
}

impl AppState {
    fn pool(&self) -> Result<&PgPool, StatusCode> {
        self.pool.as_ref().ok_or(StatusCode::SERVICE_UNAVAILABLE)
    }
}

fn internal_error(e: anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(&e);
    tracing::error!(error = %e, "request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn get_latest_job_run(State(state): State<AppState>) -> Result<Json<JobRun>, StatusCode> {
    let pool = state.pool()?;

    let run = PgJobStore::new(pool.clone())
        .latest_run(NIGHTLY_JOB_TYPE)
        .await
        .map_err(internal_error)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(run))
}

async fn get_latest_recommendation(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<GeneratedRecommendation>, StatusCode> {
    let pool = state.pool()?;
    let user_id = parse_uuid(&user_id)?;

    let rec = PgRecommendationStore::new(pool.clone())
        .latest_for_user(user_id)
        .await
        .map_err(internal_error)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(rec))
}

async fn get_active_alerts(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Alert>>, StatusCode> {
    let pool = state.pool()?;
    let user_id = parse_uuid(&user_id)?;

    let store = PgAlertStore::new(pool.clone());
    let mut alerts = store
        .active_for_user(user_id, AlertType::Opportunity)
        .await
        .map_err(internal_error)?;
    alerts.extend(
        store
            .active_for_user(user_id, AlertType::AllocationDrift)
            .await
            .map_err(internal_error)?,
    );
    alerts.extend(
        store
            .active_for_user(user_id, AlertType::System)
            .await
            .map_err(internal_error)?,
    );
    alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(Json(alerts))
}

async fn get_verification(
    State(state): State<AppState>,
    Path(correlation_id): Path<String>,
) -> Result<Json<VerifyResult>, StatusCode> {
    let pool = state.pool()?;
    let correlation_id = parse_uuid(&correlation_id)?;

    let events = PgEventStore::new(pool.clone());
    let result = folio_core::jobs::verify(&events, correlation_id)
        .await
        .map_err(internal_error)?;

    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct RecordInvestmentRequest {
    user_id: Uuid,
    portfolio_id: Uuid,
    asset_id: Uuid,
    /// Decimal string in the portfolio's base currency.
    amount: String,
    /// Decimal string of units bought.
    quantity: String,
    /// Correlation id of the recommendation's scoring run.
    correlation_id: Uuid,
}

#[derive(Debug, Serialize)]
struct RecordInvestmentResponse {
    investment_id: Uuid,
}

async fn post_investment(
    State(state): State<AppState>,
    Json(req): Json<RecordInvestmentRequest>,
) -> Result<(StatusCode, Json<RecordInvestmentResponse>), StatusCode> {
    let pool = state.pool()?;

    let amount = parse_decimal(&req.amount).map_err(|_| StatusCode::BAD_REQUEST)?;
    let quantity = parse_decimal(&req.quantity).map_err(|_| StatusCode::BAD_REQUEST)?;

    let investment_id = folio_core::storage::investments::record_investment(
        pool,
        req.user_id,
        req.portfolio_id,
        req.asset_id,
        amount,
        quantity,
        req.correlation_id,
    )
    .await
    .map_err(internal_error)?;

    Ok((
        StatusCode::CREATED,
        Json(RecordInvestmentResponse { investment_id }),
    ))
}

async fn post_investment_confirmation(
    State(state): State<AppState>,
    Path(investment_id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    let pool = state.pool()?;
    let investment_id = parse_uuid(&investment_id)?;

    folio_core::storage::investments::confirm_investment(pool, investment_id)
        .await
        .map_err(internal_error)?;

    Ok(StatusCode::NO_CONTENT)
}

fn parse_uuid(s: &str) -> Result<Uuid, StatusCode> {
    Uuid::parse_str(s).map_err(|_| StatusCode::BAD_REQUEST)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &folio_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

use anyhow::Context;
use clap::{Parser, Subcommand};
use folio_core::cache::{MemoryCache, RecommendationCache, RedisCache};
use folio_core::domain::job::JobStatus;
use folio_core::jobs::{run_nightly_job, JobConfig, JobServices};
use folio_core::providers::{
    HttpExchangeRateProvider, HttpFundamentalsProvider, HttpPriceProvider, NoopPriceProvider,
    PriceProvider,
};
use folio_core::storage::alerts::PgAlertStore;
use folio_core::storage::events::PgEventStore;
use folio_core::storage::jobs::PgJobStore;
use folio_core::storage::portfolios::PgPortfolioReader;
use folio_core::storage::recommendations::PgRecommendationStore;
use folio_core::storage::scores::PgScoreStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "folio_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the nightly scoring, alerting, and recommendation pipeline.
    Run {
        /// Users per scoring batch.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Validate configuration and print the step plan without touching
        /// the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// Replay a calculation from its captured inputs and compare results.
    Verify {
        /// Correlation ID of the calculation to verify.
        #[arg(long)]
        correlation_id: String,
    },
}

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

    let args = Args::parse();

    match args.command {
        Command::Run {
            batch_size,
            dry_run,
        } => run_pipeline(&settings, batch_size, dry_run).await,
        Command::Verify { correlation_id } => verify(&settings, &correlation_id).await,
    }
}

async fn run_pipeline(
    settings: &folio_core::config::Settings,
    batch_size: Option<usize>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let production = settings.is_production();

    let prices: Arc<dyn PriceProvider> = match HttpPriceProvider::from_settings(settings)? {
        Some(p) => Arc::new(p),
        None => {
            // Missing prices degrade scoring (criteria get skipped) outside
            // production; in production this configuration cannot run.
            anyhow::ensure!(
                !production,
                "PRICE_PROVIDER_BASE_URL is required in production"
            );
            tracing::warn!("no price provider configured; price criteria will be skipped");
            Arc::new(NoopPriceProvider)
        }
    };

    if dry_run {
        settings.require_database_url()?;
        settings.require_rate_provider_base_url()?;
        settings.require_fundamentals_provider_base_url()?;
        tracing::info!(
            production,
            price_provider = prices.provider_name(),
            steps = ?folio_core::domain::job::JobStep::ALL
                .iter()
                .map(|s| s.name())
                .collect::<Vec<_>>(),
            "dry run: configuration valid, exiting before any write"
        );
        return Ok(());
    }

    let db_url = settings.require_database_url()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    folio_core::storage::migrate(&pool).await?;

    let job_date = chrono::Utc::now().date_naive();
    let acquired = folio_core::storage::lock::try_acquire_job_date_lock(&pool, job_date).await?;
    if !acquired {
        tracing::warn!(%job_date, "job date lock not acquired; another run in progress");
        return Ok(());
    }

    let cache: Arc<dyn RecommendationCache> = match settings.redis_url.as_deref() {
        Some(url) => Arc::new(RedisCache::connect(url).await?),
        None => {
            anyhow::ensure!(!production, "REDIS_URL is required in production");
            tracing::warn!("no REDIS_URL configured; using in-process cache");
            Arc::new(MemoryCache::new())
        }
    };

    let services = JobServices {
        events: Arc::new(PgEventStore::new(pool.clone())),
        scores: Arc::new(PgScoreStore::new(pool.clone())),
        alerts: Arc::new(PgAlertStore::new(pool.clone())),
        recommendations: Arc::new(PgRecommendationStore::new(pool.clone())),
        portfolios: Arc::new(PgPortfolioReader::new(pool.clone())),
        jobs: Arc::new(PgJobStore::new(pool.clone())),
        cache,
        prices,
        rates: Arc::new(HttpExchangeRateProvider::from_settings(settings)?),
        fundamentals: Arc::new(HttpFundamentalsProvider::from_settings(settings)?),
    };

    let config = JobConfig {
        batch_size,
        production,
        ..JobConfig::default()
    };

    let outcome = run_nightly_job(&services, &config).await;
    let _ = folio_core::storage::lock::release_job_date_lock(&pool, job_date).await;

    match outcome {
        Ok(summary) => {
            tracing::info!(
                job_run_id = %summary.job_run_id,
                status = summary.status.as_str(),
                resumed_steps = summary.resumed_steps,
                "nightly run finished"
            );
            if summary.status == JobStatus::Partial {
                tracing::warn!(metrics = %summary.metrics, "nightly run completed with failures");
            }
            Ok(())
        }
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, "nightly run failed");
            Err(err)
        }
    }
}

async fn verify(
    settings: &folio_core::config::Settings,
    correlation_id: &str,
) -> anyhow::Result<()> {
    let correlation_id = uuid::Uuid::parse_str(correlation_id.trim())
        .context("correlation id must be a valid UUID")?;

    let db_url = settings.require_database_url()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    let events = PgEventStore::new(pool);
    let result = folio_core::jobs::verify(&events, correlation_id).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.verified {
        tracing::warn!(
            %correlation_id,
            discrepancies = result.discrepancies.len(),
            error = result.error.as_deref().unwrap_or(""),
            "replay verification failed"
        );
    }

    Ok(())
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

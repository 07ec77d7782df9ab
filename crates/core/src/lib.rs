pub mod alerts;
pub mod allocation;
pub mod cache;
pub mod decimal;
pub mod domain;
pub mod jobs;
pub mod providers;
pub mod recommend;
pub mod scoring;
pub mod storage;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub app_env: String,
        pub database_url: Option<String>,
        pub redis_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub price_provider_base_url: Option<String>,
        pub price_provider_api_key: Option<String>,
        pub rate_provider_base_url: Option<String>,
        pub rate_provider_api_key: Option<String>,
        pub fundamentals_provider_base_url: Option<String>,
        pub fundamentals_provider_api_key: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                app_env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                database_url: std::env::var("DATABASE_URL").ok(),
                redis_url: std::env::var("REDIS_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                price_provider_base_url: std::env::var("PRICE_PROVIDER_BASE_URL").ok(),
                price_provider_api_key: std::env::var("PRICE_PROVIDER_API_KEY").ok(),
                rate_provider_base_url: std::env::var("RATE_PROVIDER_BASE_URL").ok(),
                rate_provider_api_key: std::env::var("RATE_PROVIDER_API_KEY").ok(),
                fundamentals_provider_base_url: std::env::var("FUNDAMENTALS_PROVIDER_BASE_URL")
                    .ok(),
                fundamentals_provider_api_key: std::env::var("FUNDAMENTALS_PROVIDER_API_KEY").ok(),
            })
        }

        pub fn is_production(&self) -> bool {
            self.app_env.eq_ignore_ascii_case("production")
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_redis_url(&self) -> anyhow::Result<&str> {
            self.redis_url.as_deref().context("REDIS_URL is required")
        }

        pub fn require_rate_provider_base_url(&self) -> anyhow::Result<&str> {
            self.rate_provider_base_url
                .as_deref()
                .context("RATE_PROVIDER_BASE_URL is required")
        }

        pub fn require_fundamentals_provider_base_url(&self) -> anyhow::Result<&str> {
            self.fundamentals_provider_base_url
                .as_deref()
                .context("FUNDAMENTALS_PROVIDER_BASE_URL is required")
        }
    }
}

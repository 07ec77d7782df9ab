use crate::config::Settings;
use crate::domain::market::ExchangeRates;
use crate::providers::{env_u32, env_u64, join_url, DEFAULT_RETRIES, DEFAULT_TIMEOUT_SECS};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use std::time::Duration;

const DEFAULT_PATH: &str = "/v1/rates";

#[async_trait::async_trait]
pub trait ExchangeRateProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn get_rates(&self, base: &str, targets: &[String]) -> Result<ExchangeRates>;
}

#[derive(Debug, Clone)]
pub struct HttpExchangeRateProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    path: String,
    retries: u32,
}

impl HttpExchangeRateProvider {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_rate_provider_base_url()?.to_string();

        let timeout_secs = env_u64("RATE_PROVIDER_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS);
        let retries = env_u32("RATE_PROVIDER_RETRIES", DEFAULT_RETRIES);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build rate provider http client")?;

        Ok(Self {
            http,
            base_url,
            api_key: settings.rate_provider_api_key.clone(),
            path: DEFAULT_PATH.to_string(),
            retries,
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    async fn fetch_once(&self, base: &str, targets: &[String]) -> Result<ExchangeRates> {
        let url = join_url(&self.base_url, &self.path);
        let res = self
            .http
            .get(url)
            .headers(self.headers()?)
            .query(&[("base", base.to_string()), ("targets", targets.join(","))])
            .send()
            .await
            .context("rate provider request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read rate provider response")?;

        if !status.is_success() {
            anyhow::bail!("rate provider HTTP {status}: {text}");
        }

        let parsed: ExchangeRates = serde_json::from_str(&text)
            .with_context(|| format!("rate provider response is not valid JSON: {text}"))?;

        anyhow::ensure!(
            parsed.base == base,
            "rate provider base mismatch: expected {base}, got {}",
            parsed.base
        );
        for (currency, rate) in &parsed.rates {
            anyhow::ensure!(
                *rate > rust_decimal::Decimal::ZERO,
                "non-positive rate for {currency}"
            );
        }

        Ok(parsed)
    }
}

#[async_trait::async_trait]
impl ExchangeRateProvider for HttpExchangeRateProvider {
    fn provider_name(&self) -> &'static str {
        "external_http_json"
    }

    async fn get_rates(&self, base: &str, targets: &[String]) -> Result<ExchangeRates> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(base, targets).await {
                Ok(rates) => return Ok(rates),
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(attempt, ?backoff, error = %err, "rate fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

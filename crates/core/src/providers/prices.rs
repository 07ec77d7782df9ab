use crate::config::Settings;
use crate::domain::market::AssetPrice;
use crate::providers::{env_u32, env_u64, join_url, DEFAULT_RETRIES, DEFAULT_TIMEOUT_SECS};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_PATH: &str = "/v1/prices";

#[async_trait::async_trait]
pub trait PriceProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn get_prices(&self, symbols: &[String]) -> Result<Vec<AssetPrice>>;
}

#[derive(Debug, Clone)]
pub struct HttpPriceProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    path: String,
    retries: u32,
}

#[derive(Debug, Deserialize)]
struct PricesResponse {
    prices: Vec<AssetPrice>,
}

impl HttpPriceProvider {
    pub fn from_settings(settings: &Settings) -> Result<Option<Self>> {
        let Some(base_url) = settings.price_provider_base_url.clone() else {
            return Ok(None);
        };

        let timeout_secs = env_u64("PRICE_PROVIDER_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS);
        let retries = env_u32("PRICE_PROVIDER_RETRIES", DEFAULT_RETRIES);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build price provider http client")?;

        Ok(Some(Self {
            http,
            base_url,
            api_key: settings.price_provider_api_key.clone(),
            path: DEFAULT_PATH.to_string(),
            retries,
        }))
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    async fn fetch_once(&self, symbols: &[String]) -> Result<Vec<AssetPrice>> {
        let url = join_url(&self.base_url, &self.path);
        let res = self
            .http
            .get(url)
            .headers(self.headers()?)
            .query(&[("symbols", symbols.join(","))])
            .send()
            .await
            .context("price provider request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read price provider response")?;

        if !status.is_success() {
            anyhow::bail!("price provider HTTP {status}: {text}");
        }

        let parsed: PricesResponse = serde_json::from_str(&text)
            .with_context(|| format!("price provider response is not valid JSON: {text}"))?;

        for p in &parsed.prices {
            anyhow::ensure!(!p.symbol.trim().is_empty(), "price symbol must be non-empty");
            anyhow::ensure!(
                p.price >= rust_decimal::Decimal::ZERO,
                "negative price for {}",
                p.symbol
            );
        }

        Ok(parsed.prices)
    }
}

#[async_trait::async_trait]
impl PriceProvider for HttpPriceProvider {
    fn provider_name(&self) -> &'static str {
        "external_http_json"
    }

    async fn get_prices(&self, symbols: &[String]) -> Result<Vec<AssetPrice>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(symbols).await {
                Ok(prices) => return Ok(prices),
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(attempt, ?backoff, error = %err, "price fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

/// Stands in when no price provider is configured outside production:
/// returns no prices, so price-dependent criteria are skipped rather than
/// failing the run. Production startup rejects this provider.
#[derive(Debug, Clone, Default)]
pub struct NoopPriceProvider;

#[async_trait::async_trait]
impl PriceProvider for NoopPriceProvider {
    fn provider_name(&self) -> &'static str {
        "noop"
    }

    async fn get_prices(&self, _symbols: &[String]) -> Result<Vec<AssetPrice>> {
        Ok(Vec::new())
    }
}

use crate::config::Settings;
use crate::domain::market::FundamentalRatios;
use crate::providers::{env_u32, env_u64, join_url, DEFAULT_RETRIES, DEFAULT_TIMEOUT_SECS};
use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_PATH: &str = "/v1/fundamentals";

#[async_trait::async_trait]
pub trait FundamentalsProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Ratios come back tagged with source and freshness; entries older than
    /// the staleness window carry `is_stale = true`.
    async fn get_fundamentals(&self, symbols: &[String]) -> Result<Vec<FundamentalRatios>>;
}

#[derive(Debug, Clone)]
pub struct HttpFundamentalsProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    path: String,
    retries: u32,
}

#[derive(Debug, Deserialize)]
struct FundamentalsResponse {
    ratios: Vec<FundamentalRatios>,
}

impl HttpFundamentalsProvider {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_fundamentals_provider_base_url()?.to_string();

        let timeout_secs = env_u64("FUNDAMENTALS_PROVIDER_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS);
        let retries = env_u32("FUNDAMENTALS_PROVIDER_RETRIES", DEFAULT_RETRIES);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build fundamentals provider http client")?;

        Ok(Self {
            http,
            base_url,
            api_key: settings.fundamentals_provider_api_key.clone(),
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

    async fn fetch_once(&self, symbols: &[String]) -> Result<Vec<FundamentalRatios>> {
        let url = join_url(&self.base_url, &self.path);
        let res = self
            .http
            .get(url)
            .headers(self.headers()?)
            .query(&[("symbols", symbols.join(","))])
            .send()
            .await
            .context("fundamentals provider request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read fundamentals provider response")?;

        if !status.is_success() {
            anyhow::bail!("fundamentals provider HTTP {status}: {text}");
        }

        let parsed: FundamentalsResponse = serde_json::from_str(&text)
            .with_context(|| format!("fundamentals provider response is not valid JSON: {text}"))?;

        let now = Utc::now();
        let mut ratios = parsed.ratios;
        for f in &mut ratios {
            anyhow::ensure!(
                !f.symbol.trim().is_empty(),
                "fundamentals symbol must be non-empty"
            );
            f.flag_staleness(now);
        }

        Ok(ratios)
    }
}

#[async_trait::async_trait]
impl FundamentalsProvider for HttpFundamentalsProvider {
    fn provider_name(&self) -> &'static str {
        "external_http_json"
    }

    async fn get_fundamentals(&self, symbols: &[String]) -> Result<Vec<FundamentalRatios>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(symbols).await {
                Ok(ratios) => return Ok(ratios),
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(attempt, ?backoff, error = %err, "fundamentals fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

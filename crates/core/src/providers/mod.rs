pub mod fundamentals;
pub mod prices;
pub mod rates;

pub use fundamentals::{FundamentalsProvider, HttpFundamentalsProvider};
pub use prices::{HttpPriceProvider, NoopPriceProvider, PriceProvider};
pub use rates::{ExchangeRateProvider, HttpExchangeRateProvider};

pub(crate) const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub(crate) const DEFAULT_RETRIES: u32 = 3;

pub(crate) fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(default)
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    format!("{}{}", base.trim_end_matches('/'), path)
}

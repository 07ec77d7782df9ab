use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fundamentals older than this are flagged stale. Stale values still score
/// unless the criterion demands freshness.
pub const FUNDAMENTALS_STALENESS_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetPrice {
    pub symbol: String,
    pub price: Decimal,
    pub currency: String,
    pub fetched_at: DateTime<Utc>,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRates {
    pub base: String,
    /// Units of target currency per one unit of base.
    pub rates: BTreeMap<String, Decimal>,
    pub fetched_at: DateTime<Utc>,
    pub source: String,
}

impl ExchangeRates {
    /// Convert an amount denominated in `currency` into the base currency.
    /// Returns None when the rate is missing.
    pub fn to_base(&self, amount: Decimal, currency: &str) -> Option<Decimal> {
        if currency == self.base {
            return Some(amount);
        }
        let rate = self.rates.get(currency)?;
        if rate.is_zero() {
            return None;
        }
        Some(amount / *rate)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundamentalRatios {
    pub symbol: String,
    pub ratios: BTreeMap<String, Decimal>,
    pub as_of: DateTime<Utc>,
    pub source: String,
    #[serde(default)]
    pub is_stale: bool,
}

impl FundamentalRatios {
    pub fn flag_staleness(&mut self, now: DateTime<Utc>) {
        self.is_stale = now - self.as_of > Duration::days(FUNDAMENTALS_STALENESS_DAYS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn converts_to_base_via_rate() {
        let rates = ExchangeRates {
            base: "USD".to_string(),
            rates: BTreeMap::from([("EUR".to_string(), dec!(0.8))]),
            fetched_at: Utc::now(),
            source: "test".to_string(),
        };
        assert_eq!(rates.to_base(dec!(80), "EUR"), Some(dec!(100)));
        assert_eq!(rates.to_base(dec!(5), "USD"), Some(dec!(5)));
        assert_eq!(rates.to_base(dec!(5), "GBP"), None);
    }

    #[test]
    fn staleness_flag_uses_seven_day_window() {
        let as_of = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let mut f = FundamentalRatios {
            symbol: "AAPL".to_string(),
            ratios: BTreeMap::new(),
            as_of,
            source: "test".to_string(),
            is_stale: false,
        };

        f.flag_staleness(as_of + Duration::days(7));
        assert!(!f.is_stale);

        f.flag_staleness(as_of + Duration::days(8));
        assert!(f.is_stale);
    }
}

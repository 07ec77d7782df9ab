use crate::domain::market::{AssetPrice, ExchangeRates};
use crate::domain::portfolio::Holding;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Portfolio value decomposed by asset class, in base currency.
#[derive(Debug, Clone, Default)]
pub struct AllocationSnapshot {
    pub total_value: Decimal,
    /// Percent of total value per class id, 0..=100.
    pub percent_by_class: BTreeMap<uuid::Uuid, Decimal>,
    /// Holdings that could not be valued (no price or no rate).
    pub unvalued_symbols: Vec<String>,
}

/// Current allocation per class from holdings valued at the batch-wide price
/// and rate snapshot. Drift detection and recommendation generation both read
/// from this, so they can never disagree about where the portfolio stands.
pub fn current_allocations(
    holdings: &[Holding],
    prices: &BTreeMap<String, AssetPrice>,
    rates: &ExchangeRates,
) -> AllocationSnapshot {
    let mut value_by_class: BTreeMap<uuid::Uuid, Decimal> = BTreeMap::new();
    let mut total = Decimal::ZERO;
    let mut unvalued = Vec::new();

    for holding in holdings {
        let Some(price) = prices.get(&holding.symbol) else {
            unvalued.push(holding.symbol.clone());
            continue;
        };
        let native_value = holding.quantity * price.price;
        let Some(base_value) = rates.to_base(native_value, &price.currency) else {
            unvalued.push(holding.symbol.clone());
            continue;
        };
        *value_by_class.entry(holding.class_id).or_default() += base_value;
        total += base_value;
    }

    let mut percent_by_class = BTreeMap::new();
    if !total.is_zero() {
        for (class_id, value) in &value_by_class {
            percent_by_class.insert(*class_id, value / total * Decimal::ONE_HUNDRED);
        }
    }

    AllocationSnapshot {
        total_value: total,
        percent_by_class,
        unvalued_symbols: unvalued,
    }
}

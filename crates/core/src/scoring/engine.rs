use crate::decimal::{percentage_string, score_string};
use crate::domain::criteria::{Criterion, CriterionOperator};
use crate::domain::event::{CapturedAsset, InputsCapturedPayload};
use crate::domain::market::{AssetPrice, FundamentalRatios};
use crate::domain::score::{AssetScoreResult, CriterionBreakdown, SkippedReason};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Reserved metric key resolved against the price snapshot instead of the
/// fundamentals ratios.
const PRICE_METRIC: &str = "price";

/// Everything the engine evaluates against. Built either live (batch run) or
/// from a captured INPUTS_CAPTURED payload (replay); both paths must produce
/// identical output for identical content.
#[derive(Debug, Clone)]
pub struct ScoringInputs {
    pub criteria: Vec<Criterion>,
    pub assets: Vec<CapturedAsset>,
    pub fundamentals: BTreeMap<String, FundamentalRatios>,
    pub prices: BTreeMap<String, AssetPrice>,
}

impl ScoringInputs {
    pub fn from_captured(payload: &InputsCapturedPayload) -> Self {
        let fundamentals = payload
            .fundamentals
            .iter()
            .map(|f| (f.symbol.clone(), f.clone()))
            .collect();
        let prices = payload
            .prices
            .iter()
            .map(|p| (p.symbol.clone(), p.clone()))
            .collect();
        Self {
            criteria: payload.criteria.clone(),
            assets: payload.assets.clone(),
            fundamentals,
            prices,
        }
    }

    fn metric_value(&self, symbol: &str, metric: &str) -> MetricValue {
        if metric == PRICE_METRIC {
            return match self.prices.get(symbol) {
                Some(p) => MetricValue::Present(p.price),
                None => MetricValue::Missing,
            };
        }

        match self.fundamentals.get(symbol) {
            Some(f) => match f.ratios.get(metric) {
                Some(v) => {
                    if f.is_stale {
                        MetricValue::PresentStale(*v)
                    } else {
                        MetricValue::Present(*v)
                    }
                }
                None => MetricValue::Missing,
            },
            None => MetricValue::Missing,
        }
    }
}

enum MetricValue {
    Present(Decimal),
    PresentStale(Decimal),
    Missing,
}

/// Pure scoring pass: criteria in stored order against each asset.
/// Deterministic by construction: exact decimal arithmetic, fixed-scale
/// string output, input order preserved.
pub fn score_assets(inputs: &ScoringInputs) -> Vec<AssetScoreResult> {
    inputs
        .assets
        .iter()
        .map(|asset| score_one(inputs, asset))
        .collect()
}

fn score_one(inputs: &ScoringInputs, asset: &CapturedAsset) -> AssetScoreResult {
    let mut score = Decimal::ZERO;
    let mut max_possible = Decimal::ZERO;
    let mut breakdown = Vec::with_capacity(inputs.criteria.len());

    for criterion in &inputs.criteria {
        let entry = evaluate_criterion(inputs, asset, criterion);
        if entry.skipped_reason.is_none() {
            max_possible += criterion.points.abs();
            if entry.matched {
                score += criterion.points;
            }
        }
        breakdown.push(entry);
    }

    AssetScoreResult {
        asset_id: asset.asset_id,
        symbol: asset.symbol.clone(),
        score: score_string(score),
        max_possible_score: score_string(max_possible),
        percentage: percentage_string(score, max_possible),
        breakdown,
    }
}

fn evaluate_criterion(
    inputs: &ScoringInputs,
    asset: &CapturedAsset,
    criterion: &Criterion,
) -> CriterionBreakdown {
    let value = inputs.metric_value(&asset.symbol, &criterion.metric);

    // `exists` asks whether the metric is present at all, so a missing value
    // is an answer, not a skip.
    if criterion.operator == CriterionOperator::Exists {
        let (matched, actual) = match value {
            MetricValue::Present(v) => (true, Some(v)),
            MetricValue::PresentStale(v) => (!criterion.requires_fresh, Some(v)),
            MetricValue::Missing => (false, None),
        };
        return breakdown_entry(criterion, matched, actual, None);
    }

    let actual = match value {
        MetricValue::Present(v) => v,
        MetricValue::PresentStale(v) => {
            if criterion.requires_fresh {
                return breakdown_entry(criterion, false, Some(v), Some(SkippedReason::DataStale));
            }
            v
        }
        MetricValue::Missing => {
            return breakdown_entry(criterion, false, None, Some(SkippedReason::MissingFundamental));
        }
    };

    let matched = match (criterion.operator, criterion.threshold) {
        (CriterionOperator::Eq, Some(t)) => actual == t,
        (CriterionOperator::Neq, Some(t)) => actual != t,
        (CriterionOperator::Gt, Some(t)) => actual > t,
        (CriterionOperator::Gte, Some(t)) => actual >= t,
        (CriterionOperator::Lt, Some(t)) => actual < t,
        (CriterionOperator::Lte, Some(t)) => actual <= t,
        (CriterionOperator::Between, Some(low)) => match criterion.threshold_high {
            Some(high) => actual >= low && actual <= high,
            None => false,
        },
        // A comparison operator without a stored threshold can never match.
        (_, None) => false,
        (CriterionOperator::Exists, _) => unreachable!("handled above"),
    };

    breakdown_entry(criterion, matched, Some(actual), None)
}

fn breakdown_entry(
    criterion: &Criterion,
    matched: bool,
    actual: Option<Decimal>,
    skipped_reason: Option<SkippedReason>,
) -> CriterionBreakdown {
    let awarded = if matched && skipped_reason.is_none() {
        criterion.points
    } else {
        Decimal::ZERO
    };
    CriterionBreakdown {
        criterion_id: criterion.id,
        matched,
        points_awarded: score_string(awarded),
        actual_value: actual.map(|v| v.to_string()),
        skipped_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn criterion(metric: &str, op: CriterionOperator, threshold: Decimal, points: Decimal) -> Criterion {
        Criterion {
            id: Uuid::new_v4(),
            metric: metric.to_string(),
            operator: op,
            threshold: Some(threshold),
            threshold_high: None,
            points,
            requires_fresh: false,
        }
    }

    fn asset(symbol: &str) -> CapturedAsset {
        CapturedAsset {
            asset_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
        }
    }

    fn fundamentals(symbol: &str, ratios: &[(&str, Decimal)], stale: bool) -> FundamentalRatios {
        FundamentalRatios {
            symbol: symbol.to_string(),
            ratios: ratios
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            as_of: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
            source: "test".to_string(),
            is_stale: stale,
        }
    }

    fn inputs(
        criteria: Vec<Criterion>,
        assets: Vec<CapturedAsset>,
        funds: Vec<FundamentalRatios>,
    ) -> ScoringInputs {
        ScoringInputs {
            criteria,
            assets,
            fundamentals: funds.into_iter().map(|f| (f.symbol.clone(), f)).collect(),
            prices: BTreeMap::new(),
        }
    }

    #[test]
    fn pe_under_twenty_awards_full_points() {
        // One asset, criterion "P/E < 20" worth 10 points, actual P/E 15.
        let c = criterion("pe_ratio", CriterionOperator::Lt, dec!(20), dec!(10));
        let a = asset("AAPL");
        let f = fundamentals("AAPL", &[("pe_ratio", dec!(15))], false);

        let results = score_assets(&inputs(vec![c], vec![a], vec![f]));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].score, "10.0000");
        assert_eq!(results[0].max_possible_score, "10.0000");
        assert_eq!(results[0].percentage, "100.0000");
        assert!(results[0].breakdown[0].matched);
    }

    #[test]
    fn missing_fundamental_skips_and_guards_percentage() {
        let c = criterion("pe_ratio", CriterionOperator::Lt, dec!(20), dec!(10));
        let a = asset("AAPL");

        let results = score_assets(&inputs(vec![c], vec![a], vec![]));
        assert_eq!(results[0].score, "0.0000");
        assert_eq!(results[0].max_possible_score, "0.0000");
        assert_eq!(results[0].percentage, "0");
        assert_eq!(
            results[0].breakdown[0].skipped_reason,
            Some(SkippedReason::MissingFundamental)
        );
    }

    #[test]
    fn signed_points_sum_exactly() {
        // +10, +5, -3 all matching must come out as exactly "12.0000".
        let criteria = vec![
            criterion("a", CriterionOperator::Gte, dec!(1), dec!(10)),
            criterion("b", CriterionOperator::Gte, dec!(1), dec!(5)),
            criterion("c", CriterionOperator::Gte, dec!(1), dec!(-3)),
        ];
        let a = asset("VTI");
        let f = fundamentals(
            "VTI",
            &[("a", dec!(2)), ("b", dec!(2)), ("c", dec!(2))],
            false,
        );

        let results = score_assets(&inputs(criteria, vec![a], vec![f]));
        assert_eq!(results[0].score, "12.0000");
        // max counts |points| = 10 + 5 + 3.
        assert_eq!(results[0].max_possible_score, "18.0000");
        assert_eq!(results[0].percentage, "66.6667");
    }

    #[test]
    fn stale_data_skips_only_freshness_demanding_criteria() {
        let mut fresh_required = criterion("pe_ratio", CriterionOperator::Lt, dec!(20), dec!(10));
        fresh_required.requires_fresh = true;
        let tolerant = criterion("pe_ratio", CriterionOperator::Lt, dec!(20), dec!(5));

        let a = asset("MSFT");
        let f = fundamentals("MSFT", &[("pe_ratio", dec!(15))], true);

        let results = score_assets(&inputs(vec![fresh_required, tolerant], vec![a], vec![f]));
        let b = &results[0].breakdown;
        assert_eq!(b[0].skipped_reason, Some(SkippedReason::DataStale));
        assert!(b[1].matched);
        assert_eq!(results[0].score, "5.0000");
        assert_eq!(results[0].max_possible_score, "5.0000");
    }

    #[test]
    fn between_and_exists_operators() {
        let mut between = criterion("yield", CriterionOperator::Between, dec!(2), dec!(7));
        between.threshold_high = Some(dec!(4));
        let exists = Criterion {
            id: Uuid::new_v4(),
            metric: "esg_score".to_string(),
            operator: CriterionOperator::Exists,
            threshold: None,
            threshold_high: None,
            points: dec!(3),
            requires_fresh: false,
        };

        let a = asset("SCHD");
        let f = fundamentals("SCHD", &[("yield", dec!(3.5))], false);

        let results = score_assets(&inputs(vec![between, exists], vec![a], vec![f]));
        let b = &results[0].breakdown;
        assert!(b[0].matched);
        // exists on a missing metric is an unmatched evaluation, not a skip.
        assert!(!b[1].matched);
        assert_eq!(b[1].skipped_reason, None);
        assert_eq!(results[0].score, "7.0000");
        assert_eq!(results[0].max_possible_score, "10.0000");
    }

    #[test]
    fn exact_decimal_comparison_has_no_float_artifacts() {
        // 0.1 + 0.2 == 0.3 exactly under decimal arithmetic.
        let c = criterion("ratio", CriterionOperator::Eq, dec!(0.3), dec!(7));
        let a = asset("BND");
        let f = fundamentals("BND", &[("ratio", dec!(0.1) + dec!(0.2))], false);

        let results = score_assets(&inputs(vec![c], vec![a], vec![f]));
        assert!(results[0].breakdown[0].matched);
        assert_eq!(results[0].score, "7.0000");
    }

    #[test]
    fn two_passes_over_identical_inputs_are_byte_identical() {
        let criteria = vec![
            criterion("pe_ratio", CriterionOperator::Lt, dec!(25), dec!(10)),
            criterion("dividend_yield", CriterionOperator::Gte, dec!(1.5), dec!(4)),
        ];
        let assets = vec![asset("AAPL"), asset("VOO")];
        let funds = vec![
            fundamentals(
                "AAPL",
                &[("pe_ratio", dec!(28)), ("dividend_yield", dec!(0.5))],
                false,
            ),
            fundamentals(
                "VOO",
                &[("pe_ratio", dec!(22)), ("dividend_yield", dec!(1.7))],
                false,
            ),
        ];

        let i = inputs(criteria, assets, funds);
        let first = serde_json::to_string(&score_assets(&i)).unwrap();
        let second = serde_json::to_string(&score_assets(&i)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn price_metric_resolves_from_price_snapshot() {
        let c = criterion(PRICE_METRIC, CriterionOperator::Lt, dec!(500), dec!(2));
        let a = asset("VOO");
        let mut i = inputs(vec![c], vec![a], vec![]);
        i.prices.insert(
            "VOO".to_string(),
            AssetPrice {
                symbol: "VOO".to_string(),
                price: dec!(431.20),
                currency: "USD".to_string(),
                fetched_at: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
                source: "test".to_string(),
            },
        );

        let results = score_assets(&i);
        assert!(results[0].breakdown[0].matched);

        // No price snapshot at all: skipped, not failed.
        i.prices.clear();
        let results = score_assets(&i);
        assert_eq!(
            results[0].breakdown[0].skipped_reason,
            Some(SkippedReason::MissingFundamental)
        );
    }
}

use crate::allocation::AllocationSnapshot;
use crate::decimal::{fixed_string, money_string, score_string, SCORE_SCALE};
use crate::domain::market::ExchangeRates;
use crate::domain::portfolio::{ClassTarget, Portfolio};
use crate::domain::recommendation::{
    AllocationGap, AuditTrail, GeneratedRecommendation, RecommendationItem,
};
use crate::domain::score::StoredScore;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeMap;
use uuid::Uuid;

/// How investable capital is split. Class budgets follow allocation gaps;
/// within a class, assets are weighted by score percentage. The knobs keep
/// the priority rule ("higher score, larger gap first") adjustable without
/// touching the algorithm.
#[derive(Debug, Clone)]
pub struct AllocationPolicy {
    /// Assets at or below this score percentage receive no capital.
    pub score_floor: Decimal,
    /// Cap on funded assets per class, best scores first.
    pub top_n_per_class: Option<usize>,
}

impl Default for AllocationPolicy {
    fn default() -> Self {
        Self {
            score_floor: Decimal::ZERO,
            top_n_per_class: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum GenerationResult {
    Generated(Box<GeneratedRecommendation>),
    /// Ineligible users are skipped with a recorded reason, not failed.
    Skipped { reason: String },
}

#[derive(Debug, Clone)]
pub struct GeneratorContext<'a> {
    pub portfolio: &'a Portfolio,
    pub scores: &'a [StoredScore],
    pub targets: &'a [ClassTarget],
    pub allocation: &'a AllocationSnapshot,
    pub rates: &'a ExchangeRates,
    pub prices_as_of: DateTime<Utc>,
}

/// Derive per-asset investment amounts from scores and allocation gaps.
/// Pure: same context and policy always produce the same recommendation
/// apart from `generated_at`.
pub fn generate(
    ctx: &GeneratorContext<'_>,
    policy: &AllocationPolicy,
    generated_at: DateTime<Utc>,
) -> GenerationResult {
    if ctx.scores.is_empty() {
        return GenerationResult::Skipped {
            reason: "no successfully scored assets".to_string(),
        };
    }
    if ctx.targets.is_empty() {
        return GenerationResult::Skipped {
            reason: "no class targets configured".to_string(),
        };
    }

    let current = |class_id: Uuid| -> Decimal {
        ctx.allocation
            .percent_by_class
            .get(&class_id)
            .copied()
            .unwrap_or(Decimal::ZERO)
    };

    let mut gaps = Vec::with_capacity(ctx.targets.len());
    let mut over_allocated: BTreeMap<Uuid, bool> = BTreeMap::new();
    let mut positive_gap: BTreeMap<Uuid, Decimal> = BTreeMap::new();

    for target in ctx.targets {
        let cur = current(target.class_id);
        let midpoint = target.midpoint();
        let gap = midpoint - cur;
        let over = cur > target.target_max;
        over_allocated.insert(target.class_id, over);
        if !over && gap > Decimal::ZERO {
            positive_gap.insert(target.class_id, gap);
        }

        gaps.push(AllocationGap {
            class_id: target.class_id,
            class_name: target.class_name.clone(),
            current_allocation: score_string(cur),
            target_min: target.target_min.to_string(),
            target_max: target.target_max.to_string(),
            target_midpoint: score_string(midpoint),
            gap: score_string(gap),
        });
    }

    let gap_total: Decimal = positive_gap.values().copied().sum();

    // Fundable assets per class: scored above the floor, class not over its
    // target, best scores first.
    let mut fundable: BTreeMap<Uuid, Vec<&StoredScore>> = BTreeMap::new();
    for score in ctx.scores {
        if !over_allocated.contains_key(&score.class_id) {
            // No target for this class: nothing to distribute against.
            continue;
        }
        if over_allocated[&score.class_id] {
            continue;
        }
        if score.percentage <= policy.score_floor {
            continue;
        }
        fundable.entry(score.class_id).or_default().push(score);
    }
    for assets in fundable.values_mut() {
        assets.sort_by(|a, b| b.percentage.cmp(&a.percentage).then(a.symbol.cmp(&b.symbol)));
        if let Some(n) = policy.top_n_per_class {
            assets.truncate(n);
        }
    }

    let mut amounts: BTreeMap<Uuid, Decimal> = BTreeMap::new();
    if !gap_total.is_zero() {
        for (class_id, gap) in &positive_gap {
            let Some(assets) = fundable.get(class_id) else {
                continue;
            };
            let class_budget = ctx.portfolio.total_investable * *gap / gap_total;
            let weight_total: Decimal = assets.iter().map(|s| s.percentage).sum();
            if weight_total.is_zero() {
                continue;
            }
            for score in assets {
                let amount = (class_budget * score.percentage / weight_total)
                    .round_dp_with_strategy(2, RoundingStrategy::ToZero);
                amounts.insert(score.asset_id, amount);
            }
        }
    }

    let mut items: Vec<RecommendationItem> = ctx
        .scores
        .iter()
        .filter(|s| over_allocated.contains_key(&s.class_id))
        .map(|s| {
            let over = over_allocated[&s.class_id];
            let amount = if over {
                Decimal::ZERO
            } else {
                amounts.get(&s.asset_id).copied().unwrap_or(Decimal::ZERO)
            };
            RecommendationItem {
                asset_id: s.asset_id,
                symbol: s.symbol.clone(),
                class_id: s.class_id,
                score: fixed_string(s.score, SCORE_SCALE),
                percentage: fixed_string(s.percentage, SCORE_SCALE),
                recommended_amount: money_string(amount),
                is_over_allocated: over,
            }
        })
        .collect();
    items.sort_by(|a, b| a.symbol.cmp(&b.symbol));

    let first = &ctx.scores[0];
    GenerationResult::Generated(Box::new(GeneratedRecommendation {
        user_id: ctx.portfolio.user_id,
        portfolio_id: ctx.portfolio.id,
        generated_at,
        total_investable: money_string(ctx.portfolio.total_investable),
        base_currency: ctx.portfolio.base_currency.clone(),
        items,
        allocation_gaps: gaps,
        audit_trail: AuditTrail {
            criteria_version_id: first.criteria_version_id,
            exchange_rates_snapshot: ctx.rates.clone(),
            scores_correlation_id: first.correlation_id,
            prices_as_of: ctx.prices_as_of,
            rates_as_of: ctx.rates.fetched_at,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    struct Fixture {
        portfolio: Portfolio,
        targets: Vec<ClassTarget>,
        scores: Vec<StoredScore>,
        allocation: AllocationSnapshot,
        rates: ExchangeRates,
    }

    fn stored_score(class_id: Uuid, symbol: &str, pct: Decimal) -> StoredScore {
        StoredScore {
            user_id: Uuid::new_v4(),
            asset_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            class_id,
            score: pct / dec!(10),
            percentage: pct,
            correlation_id: Uuid::new_v4(),
            criteria_version_id: Uuid::new_v4(),
            computed_at: Utc::now(),
        }
    }

    fn fixture() -> Fixture {
        let equities = Uuid::new_v4();
        let bonds = Uuid::new_v4();

        let portfolio = Portfolio {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            base_currency: "USD".to_string(),
            total_investable: dec!(900),
        };

        let targets = vec![
            ClassTarget {
                class_id: equities,
                class_name: "Equities".to_string(),
                target_min: dec!(40),
                target_max: dec!(80),
            },
            ClassTarget {
                class_id: bonds,
                class_name: "Bonds".to_string(),
                target_min: dec!(20),
                target_max: dec!(40),
            },
        ];

        // Equities at 50% (midpoint 60, gap 10); bonds at 25% (midpoint 30, gap 5).
        let allocation = AllocationSnapshot {
            total_value: dec!(10000),
            percent_by_class: BTreeMap::from([(equities, dec!(50)), (bonds, dec!(25))]),
            unvalued_symbols: vec![],
        };

        let scores = vec![
            stored_score(equities, "VOO", dec!(80)),
            stored_score(equities, "VTI", dec!(40)),
            stored_score(bonds, "BND", dec!(50)),
        ];

        let rates = ExchangeRates {
            base: "USD".to_string(),
            rates: BTreeMap::new(),
            fetched_at: Utc::now(),
            source: "test".to_string(),
        };

        Fixture {
            portfolio,
            targets,
            scores,
            allocation,
            rates,
        }
    }

    fn run(f: &Fixture) -> GeneratedRecommendation {
        let ctx = GeneratorContext {
            portfolio: &f.portfolio,
            scores: &f.scores,
            targets: &f.targets,
            allocation: &f.allocation,
            rates: &f.rates,
            prices_as_of: Utc::now(),
        };
        match generate(&ctx, &AllocationPolicy::default(), Utc::now()) {
            GenerationResult::Generated(rec) => *rec,
            GenerationResult::Skipped { reason } => panic!("unexpected skip: {reason}"),
        }
    }

    #[test]
    fn gaps_are_midpoint_minus_current() {
        let f = fixture();
        let rec = run(&f);

        let equities_gap = rec
            .allocation_gaps
            .iter()
            .find(|g| g.class_name == "Equities")
            .unwrap();
        assert_eq!(equities_gap.target_midpoint, "60.0000");
        assert_eq!(equities_gap.gap, "10.0000");

        let bonds_gap = rec
            .allocation_gaps
            .iter()
            .find(|g| g.class_name == "Bonds")
            .unwrap();
        assert_eq!(bonds_gap.gap, "5.0000");
    }

    #[test]
    fn budget_follows_gaps_and_scores() {
        let f = fixture();
        let rec = run(&f);

        // Equities gap 10 vs bonds gap 5: 600 / 300 split of the 900 total.
        // Within equities, VOO (80%) gets twice VTI's (40%) share.
        let amount = |symbol: &str| {
            rec.items
                .iter()
                .find(|i| i.symbol == symbol)
                .unwrap()
                .recommended_amount
                .clone()
        };
        assert_eq!(amount("VOO"), "400.00");
        assert_eq!(amount("VTI"), "200.00");
        assert_eq!(amount("BND"), "300.00");
    }

    #[test]
    fn amounts_never_exceed_total_investable() {
        let mut f = fixture();
        f.portfolio.total_investable = dec!(1000.01);
        let rec = run(&f);

        let total: Decimal = rec
            .items
            .iter()
            .map(|i| crate::decimal::parse_decimal(&i.recommended_amount).unwrap())
            .sum();
        assert!(total <= f.portfolio.total_investable);
    }

    #[test]
    fn over_allocated_class_is_excluded_and_flagged() {
        let mut f = fixture();
        // Push equities above their 80% max.
        let equities = f.targets[0].class_id;
        f.allocation.percent_by_class.insert(equities, dec!(85));
        let rec = run(&f);

        for symbol in ["VOO", "VTI"] {
            let item = rec.items.iter().find(|i| i.symbol == symbol).unwrap();
            assert!(item.is_over_allocated);
            assert_eq!(item.recommended_amount, "0.00");
        }
        // Bonds absorb the full budget.
        let bnd = rec.items.iter().find(|i| i.symbol == "BND").unwrap();
        assert_eq!(bnd.recommended_amount, "900.00");
    }

    #[test]
    fn user_without_scores_is_skipped_with_reason() {
        let f = fixture();
        let ctx = GeneratorContext {
            portfolio: &f.portfolio,
            scores: &[],
            targets: &f.targets,
            allocation: &f.allocation,
            rates: &f.rates,
            prices_as_of: Utc::now(),
        };
        match generate(&ctx, &AllocationPolicy::default(), Utc::now()) {
            GenerationResult::Skipped { reason } => {
                assert_eq!(reason, "no successfully scored assets");
            }
            GenerationResult::Generated(_) => panic!("expected skip"),
        }
    }

    #[test]
    fn score_floor_blocks_weak_assets() {
        let f = fixture();
        let policy = AllocationPolicy {
            score_floor: dec!(45),
            top_n_per_class: None,
        };
        let ctx = GeneratorContext {
            portfolio: &f.portfolio,
            scores: &f.scores,
            targets: &f.targets,
            allocation: &f.allocation,
            rates: &f.rates,
            prices_as_of: Utc::now(),
        };
        let rec = match generate(&ctx, &policy, Utc::now()) {
            GenerationResult::Generated(rec) => *rec,
            GenerationResult::Skipped { reason } => panic!("unexpected skip: {reason}"),
        };

        // VTI (40%) sits below the floor: whole equities budget goes to VOO.
        let voo = rec.items.iter().find(|i| i.symbol == "VOO").unwrap();
        let vti = rec.items.iter().find(|i| i.symbol == "VTI").unwrap();
        assert_eq!(voo.recommended_amount, "600.00");
        assert_eq!(vti.recommended_amount, "0.00");
    }

    #[test]
    fn audit_trail_pins_the_scoring_run() {
        let f = fixture();
        let rec = run(&f);
        assert_eq!(
            rec.audit_trail.scores_correlation_id,
            f.scores[0].correlation_id
        );
        assert_eq!(
            rec.audit_trail.criteria_version_id,
            f.scores[0].criteria_version_id
        );
    }
}

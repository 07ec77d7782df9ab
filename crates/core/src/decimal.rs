use anyhow::Context;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Scores and percentages serialize at exactly four decimal places so that
/// independent recomputations over the same inputs are byte-identical.
pub const SCORE_SCALE: u32 = 4;

/// Monetary amounts serialize at two decimal places.
pub const MONEY_SCALE: u32 = 2;

pub fn score_string(value: Decimal) -> String {
    fixed_string(value, SCORE_SCALE)
}

pub fn money_string(value: Decimal) -> String {
    fixed_string(value, MONEY_SCALE)
}

/// percentage = score / max * 100, guarded: a zero max yields "0" rather than
/// a division error.
pub fn percentage_string(score: Decimal, max_possible: Decimal) -> String {
    if max_possible.is_zero() {
        return "0".to_string();
    }
    fixed_string(score / max_possible * Decimal::ONE_HUNDRED, SCORE_SCALE)
}

pub fn fixed_string(value: Decimal, scale: u32) -> String {
    let mut rounded = value.round_dp(scale);
    rounded.rescale(scale);
    rounded.to_string()
}

pub fn parse_decimal(s: &str) -> anyhow::Result<Decimal> {
    Decimal::from_str(s.trim()).with_context(|| format!("invalid decimal string: {s:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn score_string_pads_to_four_places() {
        assert_eq!(score_string(dec!(12)), "12.0000");
        assert_eq!(score_string(dec!(10.5)), "10.5000");
        assert_eq!(score_string(dec!(-3.25)), "-3.2500");
    }

    #[test]
    fn score_string_rounds_excess_precision() {
        assert_eq!(score_string(dec!(1.00005)), "1.0001");
    }

    #[test]
    fn money_string_uses_two_places() {
        assert_eq!(money_string(dec!(1000)), "1000.00");
        assert_eq!(money_string(dec!(33.333)), "33.33");
    }

    #[test]
    fn percentage_guards_zero_max() {
        assert_eq!(percentage_string(dec!(0), dec!(0)), "0");
        assert_eq!(percentage_string(dec!(10), dec!(10)), "100.0000");
        assert_eq!(percentage_string(dec!(12), dec!(18)), "66.6667");
    }

    #[test]
    fn parse_decimal_roundtrips_strings() {
        assert_eq!(parse_decimal("12.0000").unwrap(), dec!(12));
        assert!(parse_decimal("not-a-number").is_err());
    }
}

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: Uuid,
    pub user_id: Uuid,
    pub base_currency: String,
    /// Capital available for new investment, in base currency.
    pub total_investable: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub portfolio_id: Uuid,
    pub asset_id: Uuid,
    pub symbol: String,
    pub class_id: Uuid,
    pub quantity: Decimal,
    pub currency: String,
}

/// An asset eligible for scoring, whether or not the user holds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateAsset {
    pub id: Uuid,
    pub symbol: String,
    pub name: String,
    pub class_id: Uuid,
    pub currency: String,
}

/// Target allocation range for one asset class of one portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassTarget {
    pub class_id: Uuid,
    pub class_name: String,
    pub target_min: Decimal,
    pub target_max: Decimal,
}

impl ClassTarget {
    /// Midpoint of the target range, clamped into [0, 100].
    pub fn midpoint(&self) -> Decimal {
        let mid = (self.target_min + self.target_max) / Decimal::TWO;
        mid.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn target(min: Decimal, max: Decimal) -> ClassTarget {
        ClassTarget {
            class_id: Uuid::new_v4(),
            class_name: "Equities".to_string(),
            target_min: min,
            target_max: max,
        }
    }

    #[test]
    fn midpoint_is_halfway() {
        assert_eq!(target(dec!(20), dec!(40)).midpoint(), dec!(30));
    }

    #[test]
    fn midpoint_clamps_to_percent_range() {
        assert_eq!(target(dec!(150), dec!(150)).midpoint(), dec!(100));
        assert_eq!(target(dec!(-10), dec!(-10)).midpoint(), dec!(0));
    }
}

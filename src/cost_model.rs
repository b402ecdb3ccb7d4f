//! Transaction cost modeling.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::valuation::MONEY_DP;

const BPS_PER_UNIT: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

/// Estimated cost of one trade, charged in base currency.
///
/// cost = max(fixed_fee + notional × commission_bps / 10 000, min_fee)
///
/// ```
/// use driftplan::CostModel;
/// use rust_decimal::Decimal;
///
/// // Flat 2.50 per order, as most retail brokers charge for ETFs.
/// let model = CostModel::flat(Decimal::new(250, 2));
/// assert_eq!(model.compute_cost(Decimal::new(1_000, 0)), Decimal::new(250, 2));
/// ```
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CostModel {
    /// Fee charged on every order
    pub fixed_fee: Decimal,
    /// Commission in basis points of notional (1 bps = 0.01%)
    pub commission_bps: Decimal,
    /// Floor on the total cost of an order
    pub min_fee: Decimal,
}

impl CostModel {
    /// A zero-cost model (no fees).
    pub fn zero() -> Self {
        Self {
            fixed_fee: Decimal::ZERO,
            commission_bps: Decimal::ZERO,
            min_fee: Decimal::ZERO,
        }
    }

    /// A flat fee per order.
    pub fn flat(fee: Decimal) -> Self {
        Self {
            fixed_fee: fee,
            ..Self::zero()
        }
    }

    /// True when every order is free.
    pub fn is_zero(&self) -> bool {
        self.fixed_fee.is_zero() && self.commission_bps.is_zero() && self.min_fee.is_zero()
    }

    /// Cost of an order with the given notional. The sign of `notional` is ignored.
    ///
    /// Rounded up to [`MONEY_DP`] places. Non-decreasing in |notional|, which
    /// the plan generator relies on when bounding the cost of a buy by the
    /// cost of spending the whole pool.
    pub fn compute_cost(&self, notional: Decimal) -> Decimal {
        let variable = notional.abs() * self.commission_bps / BPS_PER_UNIT;
        (self.fixed_fee + variable)
            .max(self.min_fee)
            .round_dp_with_strategy(MONEY_DP, RoundingStrategy::AwayFromZero)
    }

    /// Check all components are non-negative.
    pub fn validate(&self) -> Result<(), String> {
        for (name, v) in [
            ("fixed_fee", self.fixed_fee),
            ("commission_bps", self.commission_bps),
            ("min_fee", self.min_fee),
        ] {
            if v < Decimal::ZERO {
                return Err(format!("{name} must be >= 0, got {v}"));
            }
        }
        Ok(())
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn zero_cost() {
        let model = CostModel::zero();
        assert!(model.is_zero());
        assert_eq!(model.compute_cost(dec!(10_000)), Decimal::ZERO);
    }

    #[test]
    fn bps_cost() {
        let model = CostModel {
            commission_bps: dec!(15),
            ..CostModel::zero()
        };
        // 15 bps on 10,000 = 15
        assert_eq!(model.compute_cost(dec!(10_000)), dec!(15));
        assert_eq!(model.compute_cost(dec!(-10_000)), dec!(15));
    }

    #[test]
    fn min_fee_applied() {
        let model = CostModel {
            fixed_fee: Decimal::ZERO,
            commission_bps: dec!(1),
            min_fee: dec!(1),
        };
        // 1 bps on 1,000 = 0.10, floored at 1
        assert_eq!(model.compute_cost(dec!(1_000)), dec!(1));
    }

    #[test]
    fn flat_plus_bps() {
        let model = CostModel {
            fixed_fee: dec!(2.50),
            commission_bps: dec!(10),
            min_fee: Decimal::ZERO,
        };
        assert_eq!(model.compute_cost(dec!(2_000)), dec!(4.50));
    }

    #[test]
    fn cost_rounded_up_to_money_scale() {
        let model = CostModel {
            commission_bps: dec!(15),
            ..CostModel::zero()
        };
        // 12.42987216039 → 12.42987217
        assert_eq!(model.compute_cost(dec!(8286.58144026)), dec!(12.42987217));
    }

    #[test]
    fn validate_rejects_negative() {
        let model = CostModel::flat(dec!(-1));
        assert!(model.validate().is_err());
        assert!(CostModel::flat(dec!(2.5)).validate().is_ok());
    }
}

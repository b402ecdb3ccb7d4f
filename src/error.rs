//! Errors returned by a rebalancing run.

use rust_decimal::Decimal;

use crate::types::Currency;

/// Fatal errors. Any of these aborts the run and no plan is returned.
///
/// Lot-size degradation (an order rounding down to zero units) is not an
/// error: the order is skipped and shows up as residual drift in the
/// plan summary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// No FX rate to convert `currency` into the base currency.
    #[error("no FX rate for currency {currency} (needed by {instrument})")]
    CurrencyUnavailable {
        instrument: String,
        currency: Currency,
    },

    /// The target table is malformed or does not sum to one.
    #[error("invalid allocation: {0}")]
    InvalidAllocation(String),

    /// The account snapshot violates a data model invariant.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// Plan parameters are out of range.
    #[error("invalid plan parameters: {0}")]
    InvalidParams(String),

    /// The generated plan failed independent validation.
    #[error("plan infeasible: {0}")]
    PlanInfeasible(String),

    /// Plan generation ended with a negative cash pool.
    #[error("negative cash after plan: {0}")]
    NegativeCashAfterPlan(Decimal),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let err = Error::CurrencyUnavailable {
            instrument: "IWDA".into(),
            currency: Currency::new("usd"),
        };
        assert_eq!(err.to_string(), "no FX rate for currency USD (needed by IWDA)");
        assert_eq!(
            Error::InvalidAllocation("weights sum to 0.9".into()).to_string(),
            "invalid allocation: weights sum to 0.9"
        );
    }

    #[test]
    fn is_error() {
        let err: Box<dyn std::error::Error> = Box::new(Error::PlanInfeasible("x".into()));
        assert!(err.to_string().contains("infeasible"));
    }
}

//! Target allocation file (target.json) loading and validation.

use std::path::Path;

use chrono::{DateTime, Utc};
use driftplan::{RebalanceMode, TargetTable, UnlistedPolicy};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::history::{self, ReferencePeriod, Transaction};

/// A target allocation, possibly nested by category.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetSpec {
    pub timestamp: DateTime<Utc>,
    pub allocation: TargetTable,
    #[serde(default)]
    pub constraints: Option<Constraints>,
}

/// Optional per-run overrides of the `[rebalance]` config table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Constraints {
    pub tolerance: Option<Decimal>,
    pub min_trade_value: Option<Decimal>,
    pub mode: Option<RebalanceMode>,
    pub unlisted: Option<UnlistedPolicy>,
}

impl TargetSpec {
    /// Load and validate a target.json file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::TargetRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json(&contents)
    }

    /// Parse from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let spec: TargetSpec = serde_json::from_str(json)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Structural checks. Weights are checked by flattening the table, so a
    /// bad allocation fails here with the engine's `InvalidAllocation`.
    fn validate(&self) -> Result<()> {
        self.allocation.flatten()?;

        if let Some(c) = &self.constraints {
            if let Some(tol) = c
                .tolerance
                .filter(|t| *t < Decimal::ZERO || *t >= Decimal::ONE)
            {
                return Err(Error::Target(format!(
                    "constraint tolerance must be in [0, 1), got {tol}"
                )));
            }
            if let Some(min) = c.min_trade_value.filter(|m| *m < Decimal::ZERO) {
                return Err(Error::Target(format!(
                    "constraint min_trade_value must be >= 0, got {min}"
                )));
            }
        }
        Ok(())
    }

    /// Targets that restore each instrument's share of the money invested
    /// over `period`. Stamped with the last trade inside the period.
    pub fn from_transactions(
        transactions: &[Transaction],
        period: ReferencePeriod,
    ) -> Result<Self> {
        let allocation = history::initial_ratios(transactions, period)?;
        let timestamp = transactions
            .iter()
            .filter(|t| period.contains(t.date))
            .map(|t| t.date)
            .max()
            .ok_or_else(|| Error::Target(format!("no transactions between {period}")))?;

        let spec = TargetSpec {
            timestamp,
            allocation,
            constraints: None,
        };
        spec.validate()?;
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn nested_json() -> &'static str {
        r#"{
            "timestamp": "2026-02-08T15:30:00Z",
            "allocation": [
                { "category": "equity", "weight": 0.8, "members": [
                    { "instrument": "IWDA", "weight": 0.75 },
                    { "instrument": "EMIM", "weight": 0.25 }
                ]},
                { "instrument": "AGGH", "weight": 0.2 }
            ]
        }"#
    }

    #[test]
    fn parse_nested_target() {
        let spec = TargetSpec::from_json(nested_json()).unwrap();
        assert_eq!(spec.allocation.nodes().len(), 2);
        assert!(spec.constraints.is_none());

        let weights = spec.allocation.flatten().unwrap();
        let iwda = weights.iter().find(|t| t.instrument.as_str() == "IWDA").unwrap();
        assert_eq!(iwda.fraction, dec!(0.6));
    }

    #[test]
    fn from_transactions_in_period() {
        let txs: Vec<Transaction> = serde_json::from_str(
            r#"[
                { "date": "2023-06-01T10:00:00Z", "instrument": "OLD",
                  "quantity": 1, "total": -900 },
                { "date": "2024-01-10T10:00:00Z", "instrument": "IWDA",
                  "quantity": 5, "total": -400 },
                { "date": "2024-03-15T14:00:00Z", "instrument": "AGGH",
                  "quantity": 20, "total": -100 },
                { "date": "2024-02-01T10:00:00Z", "instrument": "IWDA",
                  "quantity": 5, "total": -400 }
            ]"#,
        )
        .unwrap();
        let period = ReferencePeriod::new(
            "2024-01-01".parse().unwrap(),
            "2024-12-31".parse().unwrap(),
        )
        .unwrap();

        let spec = TargetSpec::from_transactions(&txs, period).unwrap();
        assert_eq!(spec.timestamp, "2024-03-15T14:00:00Z".parse::<DateTime<Utc>>().unwrap());
        assert!(spec.constraints.is_none());

        let weights = spec.allocation.flatten().unwrap();
        let ids: Vec<&str> = weights.iter().map(|t| t.instrument.as_str()).collect();
        assert_eq!(ids, vec!["AGGH", "IWDA"]);
        assert_eq!(weights[0].fraction, dec!(0.1111111111111111111111111111));
        let sum: Decimal = weights.iter().map(|t| t.fraction).sum();
        assert!((sum - Decimal::ONE).abs() <= driftplan::WEIGHT_EPSILON);
    }

    #[test]
    fn reject_empty_allocation() {
        let json = r#"{"timestamp":"2026-01-01T00:00:00Z","allocation":[]}"#;
        let err = TargetSpec::from_json(json).unwrap_err();
        assert!(err.is_plan_failure());
    }

    #[test]
    fn reject_weights_not_summing_to_one() {
        let json = r#"{
            "timestamp": "2026-01-01T00:00:00Z",
            "allocation": [
                { "instrument": "A", "weight": 0.6 },
                { "instrument": "B", "weight": 0.3 }
            ]
        }"#;
        let err = TargetSpec::from_json(json).unwrap_err();
        assert!(matches!(
            err,
            Error::Engine(driftplan::Error::InvalidAllocation(_))
        ));
    }

    #[test]
    fn reject_duplicate_instrument() {
        let json = r#"{
            "timestamp": "2026-01-01T00:00:00Z",
            "allocation": [
                { "instrument": "A", "weight": 0.5 },
                { "instrument": "A", "weight": 0.5 }
            ]
        }"#;
        assert!(TargetSpec::from_json(json).is_err());
    }

    #[test]
    fn reject_bad_timestamp() {
        let json = r#"{"timestamp":"yesterday","allocation":[{"instrument":"A","weight":1}]}"#;
        assert!(matches!(TargetSpec::from_json(json), Err(Error::Json(_))));
    }

    #[test]
    fn accept_with_constraints() {
        let json = r#"{
            "timestamp": "2026-01-01T00:00:00Z",
            "allocation": [{ "instrument": "A", "weight": 1.0 }],
            "constraints": { "tolerance": 0.05, "mode": "buy-only" }
        }"#;
        let spec = TargetSpec::from_json(json).unwrap();
        let c = spec.constraints.unwrap();
        assert_eq!(c.tolerance, Some(dec!(0.05)));
        assert_eq!(c.mode, Some(RebalanceMode::BuyOnly));
        assert_eq!(c.unlisted, None);
    }

    #[test]
    fn reject_bad_constraint_tolerance() {
        let json = r#"{
            "timestamp": "2026-01-01T00:00:00Z",
            "allocation": [{ "instrument": "A", "weight": 1.0 }],
            "constraints": { "tolerance": 1.0 }
        }"#;
        assert!(matches!(TargetSpec::from_json(json), Err(Error::Target(_))));
    }
}

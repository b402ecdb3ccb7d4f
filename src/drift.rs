//! Drift: signed gap between current and target weight per instrument.

use std::fmt;

use rust_decimal::Decimal;

use crate::allocation::ResolvedTargets;
use crate::error::{Error, Result};
use crate::snapshot::{PortfolioSnapshot, Universe};
use crate::types::InstrumentId;

/// Drift of one instrument at snapshot prices.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Drift {
    pub instrument: InstrumentId,
    pub unit_price: Decimal,
    pub held_quantity: Decimal,
    pub current_value: Decimal,
    pub current_weight: Decimal,
    pub target_weight: Decimal,
    /// target − current
    pub delta_weight: Decimal,
    /// Currency amount to buy (positive) or sell (negative).
    pub delta_value: Decimal,
}

/// Drift over the whole run: one entry per instrument plus the cash line.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DriftReport {
    pub total_value: Decimal,
    pub cash: Decimal,
    /// Sorted by instrument id.
    pub entries: Vec<Drift>,
    /// Change in cash if every delta were executed exactly.
    pub cash_delta: Decimal,
}

impl DriftReport {
    pub fn entry(&self, instrument: &InstrumentId) -> Option<&Drift> {
        self.entries.iter().find(|d| &d.instrument == instrument)
    }

    /// Σ instrument delta values + cash delta. Zero up to decimal rounding.
    pub fn net_delta(&self) -> Decimal {
        self.entries.iter().map(|d| d.delta_value).sum::<Decimal>() + self.cash_delta
    }

    /// Largest |delta weight| over all instruments.
    pub fn max_abs_delta_weight(&self) -> Decimal {
        self.entries
            .iter()
            .map(|d| d.delta_weight.abs())
            .max()
            .unwrap_or(Decimal::ZERO)
    }
}

/// Compute drift for every instrument held or targeted.
///
/// The snapshot's total value is the single denominator for the run. Delta
/// value is target value minus market value, which equals delta weight × total
/// but keeps a full divestment exactly equal to the held value.
pub fn compute_drift(
    snapshot: &PortfolioSnapshot,
    targets: &ResolvedTargets,
    universe: &Universe,
) -> Result<DriftReport> {
    let total = snapshot.total_value();
    if total <= Decimal::ZERO {
        return Err(Error::InvalidSnapshot(
            "portfolio has zero total value; nothing to rebalance".into(),
        ));
    }

    let mut instruments: Vec<&InstrumentId> = snapshot
        .holdings()
        .iter()
        .map(|h| h.instrument())
        .chain(targets.weights().iter().map(|t| &t.instrument))
        .collect();
    instruments.sort();
    instruments.dedup();

    let mut entries = Vec::with_capacity(instruments.len());
    for id in instruments {
        let (held_quantity, unit_price) = match snapshot.holding(id) {
            Some(h) => (h.quantity(), h.unit_price()),
            None => {
                let price = universe.price(id).ok_or_else(|| {
                    Error::InvalidAllocation(format!("no price for targeted instrument {id}"))
                })?;
                (Decimal::ZERO, price)
            }
        };

        let current_value = held_quantity * unit_price;
        let current_weight = current_value / total;
        let target_weight = targets.weight_of(id);
        let target_value = target_weight * total;

        entries.push(Drift {
            instrument: id.clone(),
            unit_price,
            held_quantity,
            current_value,
            current_weight,
            target_weight,
            delta_weight: target_weight - current_weight,
            delta_value: target_value - current_value,
        });
    }

    let cash_target = (Decimal::ONE - targets.total()) * total;
    let cash_delta = cash_target - snapshot.cash();

    Ok(DriftReport {
        total_value: total,
        cash: snapshot.cash(),
        entries,
        cash_delta,
    })
}

impl fmt::Display for DriftReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DRIFT (total {:.2}):", self.total_value)?;
        writeln!(
            f,
            "  {:12} {:>10} {:>10} {:>10} {:>12}",
            "Instrument", "Current%", "Target%", "Delta%", "Delta"
        )?;
        let hundred = Decimal::ONE_HUNDRED;
        for d in &self.entries {
            writeln!(
                f,
                "  {:12} {:>9.2}% {:>9.2}% {:>9.2}% {:>12.2}",
                d.instrument,
                d.current_weight * hundred,
                d.target_weight * hundred,
                d.delta_weight * hundred,
                d.delta_value,
            )?;
        }
        writeln!(f, "  {:12} {:>43.2}", "cash", self.cash_delta)?;
        writeln!(
            f,
            "  Max drift: {:.2}%",
            self.max_abs_delta_weight() * hundred
        )
    }
}

//! Targets derived from transaction history.
//!
//! Instead of declaring weights, an account can be steered back to how its
//! money was first put to work: every instrument's share of the net amount
//! invested over a reference period becomes its target weight.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use driftplan::{InstrumentId, TargetNode, TargetTable};
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::error::{Error, Result};

/// One executed trade from a broker transactions export.
#[derive(Debug, Clone, Deserialize)]
pub struct Transaction {
    pub date: DateTime<Utc>,
    pub instrument: InstrumentId,
    pub quantity: Decimal,
    /// Cash amount of the trade in base currency. Buys and sells carry
    /// opposite signs; which sign is which does not matter.
    pub total: Decimal,
}

/// Inclusive range of trade dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferencePeriod {
    from: NaiveDate,
    to: NaiveDate,
}

impl ReferencePeriod {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self> {
        if from > to {
            return Err(Error::Target(format!(
                "reference period starts after it ends: {from} > {to}"
            )));
        }
        Ok(Self { from, to })
    }

    #[inline]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        let day = ts.date_naive();
        self.from <= day && day <= self.to
    }
}

impl std::fmt::Display for ReferencePeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} to {}", self.from, self.to)
    }
}

/// Read a JSON array of transactions.
pub fn load_transactions(path: &Path) -> Result<Vec<Transaction>> {
    let contents = std::fs::read_to_string(path).map_err(|e| Error::TransactionsRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(serde_json::from_str(&contents)?)
}

/// Each instrument's share of the net amount traded within `period`, as a
/// flat table sorted by instrument.
///
/// Instruments whose trades net to zero were fully closed within the period
/// and get no target. An instrument netting against the direction of the
/// whole period makes the allocation invalid.
pub fn initial_ratios(
    transactions: &[Transaction],
    period: ReferencePeriod,
) -> Result<TargetTable> {
    let mut totals: FxHashMap<&InstrumentId, Decimal> = FxHashMap::default();
    for t in transactions.iter().filter(|t| period.contains(t.date)) {
        *totals.entry(&t.instrument).or_insert(Decimal::ZERO) += t.total;
    }

    let invested: Decimal = totals.values().copied().sum();
    if invested.is_zero() {
        return Err(driftplan::Error::InvalidAllocation(format!(
            "no net investment between {period}"
        ))
        .into());
    }

    let mut totals: Vec<(&InstrumentId, Decimal)> = totals.into_iter().collect();
    totals.sort_by(|a, b| a.0.cmp(b.0));

    let mut nodes = Vec::with_capacity(totals.len());
    for (instrument, total) in totals {
        if total.is_zero() {
            log::warn!("{instrument}: opened and closed within {period}, not targeted");
            continue;
        }
        let ratio = total.checked_div(invested).ok_or_else(|| {
            driftplan::Error::InvalidAllocation(format!(
                "{instrument}: {total} out of {invested} is out of range"
            ))
        })?;
        if ratio.is_sign_negative() {
            return Err(driftplan::Error::InvalidAllocation(format!(
                "{instrument}: net {total} runs against the period's net {invested}"
            ))
            .into());
        }
        nodes.push(TargetNode::Instrument {
            instrument: instrument.clone(),
            weight: ratio,
        });
    }

    log::info!("{} targets from transactions {period}", nodes.len());
    Ok(TargetTable::new(nodes))
}

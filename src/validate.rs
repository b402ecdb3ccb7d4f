//! Independent feasibility re-check of a generated plan.
//!
//! Nothing here trusts the generator's running cash pool: every figure is
//! re-derived from the snapshot and the orders themselves.

use std::fmt;

use rust_decimal::Decimal;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::plan::TradePlan;
use crate::snapshot::PortfolioSnapshot;
use crate::types::InstrumentId;

/// Outcome of all plan checks.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ValidationReport {
    pub checks: Vec<PlanCheck>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PlanCheck {
    pub name: &'static str,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CheckStatus {
    Pass,
    Fail,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Pass => write!(f, "PASS"),
            CheckStatus::Fail => write!(f, "FAIL"),
        }
    }
}

impl ValidationReport {
    pub fn has_failures(&self) -> bool {
        self.checks.iter().any(|c| c.status == CheckStatus::Fail)
    }

    fn failures(&self) -> impl Iterator<Item = &PlanCheck> {
        self.checks.iter().filter(|c| c.status == CheckStatus::Fail)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PLAN CHECKS:")?;
        for check in &self.checks {
            writeln!(f, "  [{}] {}: {}", check.status, check.name, check.detail)?;
        }
        Ok(())
    }
}

fn status(ok: bool) -> CheckStatus {
    if ok { CheckStatus::Pass } else { CheckStatus::Fail }
}

/// Run every check and build the report without judging it.
pub fn check_plan(snapshot: &PortfolioSnapshot, plan: &TradePlan) -> ValidationReport {
    let mut checks = Vec::new();

    // 1. Order integrity: positive quantities, value = quantity × price
    let bad: Vec<String> = plan
        .orders
        .iter()
        .filter(|o| {
            o.quantity <= Decimal::ZERO
                || o.unit_price <= Decimal::ZERO
                || o.estimated_cost < Decimal::ZERO
                || o.estimated_value != o.quantity * o.unit_price
        })
        .map(|o| format!("{} {}", o.side, o.instrument))
        .collect();
    checks.push(PlanCheck {
        name: "Order integrity",
        status: status(bad.is_empty()),
        detail: if bad.is_empty() {
            format!("{} orders well-formed", plan.orders.len())
        } else {
            format!("malformed: {}", bad.join(", "))
        },
    });

    // 2. Sell coverage: never sell more than is held
    let mut sold: FxHashMap<&InstrumentId, Decimal> = FxHashMap::default();
    for o in plan.sells() {
        *sold.entry(&o.instrument).or_insert(Decimal::ZERO) += o.quantity;
    }
    let mut oversold: Vec<String> = sold
        .iter()
        .filter_map(|(id, qty)| {
            let held = snapshot.quantity_of(id);
            (*qty > held).then(|| format!("{id} sells {qty} of {held}"))
        })
        .collect();
    oversold.sort();
    checks.push(PlanCheck {
        name: "Sell coverage",
        status: status(oversold.is_empty()),
        detail: if oversold.is_empty() {
            format!("{} instruments sold within holdings", sold.len())
        } else {
            oversold.join("; ")
        },
    });

    // 3. Net cash: cash − buys + sells − costs ≥ 0
    // Folded in plan order, value re-derived from quantity × price.
    let mut net = Decimal::ZERO;
    for o in &plan.orders {
        let value = o.quantity * o.unit_price;
        net += Decimal::from(o.side.cash_sign()) * value - o.estimated_cost;
    }
    let cash_after = snapshot.cash() + net;
    let cash_ok = !cash_after.is_sign_negative() || cash_after.is_zero();
    checks.push(PlanCheck {
        name: "Net cash",
        status: status(cash_ok),
        detail: format!(
            "{:.2} cash {:+.2} net = {:.2} {} 0",
            snapshot.cash(),
            net,
            cash_after,
            if cash_ok { ">=" } else { "<" },
        ),
    });

    // 4. Summary consistency: the plan's bookkeeping matches the orders
    let consistent = plan.summary.net_cash_change == net;
    checks.push(PlanCheck {
        name: "Summary consistency",
        status: status(consistent),
        detail: if consistent {
            "net cash change matches orders".into()
        } else {
            format!(
                "summary says {:.2}, orders give {:.2}",
                plan.summary.net_cash_change, net
            )
        },
    });

    ValidationReport { checks }
}

/// Validate a plan against the snapshot it was generated from.
///
/// Returns the report when every check passes, `PlanInfeasible` otherwise.
/// A failed plan must be discarded whole.
pub fn validate_plan(snapshot: &PortfolioSnapshot, plan: &TradePlan) -> Result<ValidationReport> {
    let report = check_plan(snapshot, plan);
    if report.has_failures() {
        let reasons: Vec<String> = report
            .failures()
            .map(|c| format!("{}: {}", c.name, c.detail))
            .collect();
        return Err(Error::PlanInfeasible(reasons.join("; ")));
    }
    Ok(report)
}

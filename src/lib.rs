//! # driftplan
//!
//! A deterministic portfolio rebalancing engine. Given a snapshot of current
//! holdings, a target allocation and trading constraints, it produces a
//! validated plan of buy and sell orders that moves the portfolio toward its
//! targets without spending cash it does not have.
//!
//! ## Pipeline
//!
//! | Stage | Function | Fails with |
//! |-------|----------|------------|
//! | Valuation | [`valuation::build_snapshot`] | `CurrencyUnavailable`, `InvalidSnapshot` |
//! | Targets | [`allocation::resolve`] | `InvalidAllocation` |
//! | Drift | [`drift::compute_drift`] | `InvalidSnapshot` |
//! | Plan | [`plan::generate_plan`] | `InvalidParams`, `NegativeCashAfterPlan` |
//! | Validation | [`validate::validate_plan`] | `PlanInfeasible` |
//!
//! [`rebalance`] runs the last four stages and returns either a fully
//! validated plan or an error, never a partial plan.
//!
//! ## Quick Start
//!
//! ```
//! use driftplan::{
//!     Holding, InstrumentId, PlanParams, PortfolioSnapshot, RebalanceRequest, Side,
//!     TargetTable, Universe, UnlistedPolicy, rebalance,
//! };
//! use rust_decimal::Decimal;
//!
//! let a = InstrumentId::new("A");
//! let b = InstrumentId::new("B");
//!
//! // 10 units of A at 10.00 plus 50.00 cash.
//! let snapshot = PortfolioSnapshot::new(
//!     vec![Holding::new(a.clone(), Decimal::from(10), Decimal::from(10))?],
//!     Decimal::from(50),
//! )?;
//! let universe =
//!     Universe::from_snapshot(&snapshot).with_quotes([(b.clone(), Decimal::from(20))])?;
//! let half = Decimal::new(5, 1);
//!
//! let run = rebalance(&RebalanceRequest {
//!     snapshot,
//!     targets: TargetTable::flat(&[("A", half), ("B", half)]),
//!     universe,
//!     policy: UnlistedPolicy::Divest,
//!     params: PlanParams { tolerance: Decimal::new(1, 2), ..PlanParams::default() },
//! })?;
//!
//! // Sell 2 A to raise cash, then buy 3 B.
//! assert_eq!(run.plan.orders[0].side, Side::Sell);
//! assert_eq!(run.plan.orders[0].quantity, Decimal::from(2));
//! assert_eq!(run.plan.orders[1].instrument, b);
//! assert_eq!(run.plan.orders[1].quantity, Decimal::from(3));
//! # Ok::<(), driftplan::Error>(())
//! ```
//!
//! ## Numbers
//!
//! Money, quantities and weights are [`rust_decimal::Decimal`]. Weight sums
//! are checked against [`WEIGHT_EPSILON`] (1e-6). Converted prices, cash and
//! order costs are rounded to [`MONEY_DP`] places, so every cash total in a
//! plan is exact.
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `serde` | Serialize/deserialize all public value types |
//! | `parallel` | [`rebalance_all`] over independent accounts with rayon |

pub mod allocation;
pub mod cost_model;
pub mod drift;
pub mod error;
pub mod plan;
pub mod side;
pub mod snapshot;
pub mod types;
pub mod validate;
pub mod valuation;

pub use allocation::{
    ResolvedTargets, TargetNode, TargetTable, TargetWeight, UnlistedPolicy, WEIGHT_EPSILON,
    resolve,
};
pub use cost_model::CostModel;
pub use drift::{Drift, DriftReport, compute_drift};
pub use error::{Error, Result};
pub use plan::{
    DepositNeeded, LotSizes, PlanParams, PlanSummary, RebalanceMode, ResidualDrift, SkipReason,
    SkippedTrade, TradeOrder, TradePlan, generate_plan,
};
pub use side::Side;
pub use snapshot::{Holding, PortfolioSnapshot, Universe};
pub use types::{Currency, InstrumentId};
pub use validate::{CheckStatus, PlanCheck, ValidationReport, validate_plan};
pub use valuation::{
    CashBalance, FxRates, MONEY_DP, RawPosition, RawQuote, build_snapshot,
};

/// Everything one rebalancing run needs. Owned, so runs never share state.
#[derive(Clone, Debug)]
pub struct RebalanceRequest {
    pub snapshot: PortfolioSnapshot,
    pub targets: TargetTable,
    pub universe: Universe,
    pub policy: UnlistedPolicy,
    pub params: PlanParams,
}

/// A successful run: the drift it acted on and the validated plan.
#[derive(Clone, Debug)]
pub struct RebalanceRun {
    pub targets: ResolvedTargets,
    pub drift: DriftReport,
    pub plan: TradePlan,
    pub validation: ValidationReport,
}

/// Resolve targets, compute drift, generate and validate a plan.
///
/// All-or-nothing: an error at any stage means no plan is returned.
pub fn rebalance(request: &RebalanceRequest) -> Result<RebalanceRun> {
    let targets = resolve(
        &request.targets,
        &request.snapshot,
        &request.universe,
        request.policy,
    )?;
    let drift = compute_drift(&request.snapshot, &targets, &request.universe)?;
    let plan = generate_plan(&drift, &request.params)?;
    let validation = validate_plan(&request.snapshot, &plan)?;

    Ok(RebalanceRun {
        targets,
        drift,
        plan,
        validation,
    })
}

/// Rebalance independent accounts in parallel. Results keep request order.
#[cfg(feature = "parallel")]
pub fn rebalance_all(requests: &[RebalanceRequest]) -> Vec<Result<RebalanceRun>> {
    use rayon::prelude::*;

    requests.par_iter().map(rebalance).collect()
}

//! Trade plan generation: currency deltas → discrete orders.
//!
//! Sells run first and feed the cash pool; buys then draw from it, largest
//! underweight first. Every ordering uses (|delta value| desc, instrument asc)
//! so identical inputs always produce identical plans.

use std::cmp::Ordering;
use std::fmt;

use rust_decimal::Decimal;
use rustc_hash::FxHashMap;

use crate::cost_model::CostModel;
use crate::drift::{Drift, DriftReport};
use crate::error::{Error, Result};
use crate::side::Side;
use crate::types::InstrumentId;

/// Decimal places kept before flooring a delta-derived quantity, so that a
/// value like 2.9999…97 from a repeating weight still rounds to 3 units.
const QUANTITY_GUARD_DP: u32 = 12;

/// Minimum tradable unit per instrument.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LotSizes {
    default: Decimal,
    overrides: FxHashMap<InstrumentId, Decimal>,
}

impl LotSizes {
    /// Same lot size for every instrument.
    pub fn uniform(lot: Decimal) -> Self {
        Self {
            default: lot,
            overrides: FxHashMap::default(),
        }
    }

    /// Whole units only.
    pub fn whole_units() -> Self {
        Self::uniform(Decimal::ONE)
    }

    pub fn with_override(mut self, instrument: InstrumentId, lot: Decimal) -> Self {
        self.overrides.insert(instrument, lot);
        self
    }

    #[inline]
    pub fn get(&self, instrument: &InstrumentId) -> Decimal {
        self.overrides.get(instrument).copied().unwrap_or(self.default)
    }

    fn validate(&self) -> Result<()> {
        if self.default <= Decimal::ZERO {
            return Err(Error::InvalidParams(format!(
                "default lot size must be positive, got {}",
                self.default
            )));
        }
        for (id, lot) in &self.overrides {
            if *lot <= Decimal::ZERO {
                return Err(Error::InvalidParams(format!(
                    "lot size for {id} must be positive, got {lot}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for LotSizes {
    fn default() -> Self {
        Self::whole_units()
    }
}

/// Which sides of the book a plan may use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum RebalanceMode {
    /// Sell overweights to fund underweights.
    #[default]
    BuySell,
    /// Never sell; deploy available cash into underweights only.
    BuyOnly,
}

/// Knobs for [`generate_plan`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PlanParams {
    /// Drift band as a fraction of total value; |delta weight| ≤ tolerance is not traded.
    pub tolerance: Decimal,
    pub lot_sizes: LotSizes,
    pub cost_model: CostModel,
    /// Orders with a smaller notional are dropped.
    pub min_trade_value: Decimal,
    pub mode: RebalanceMode,
}

impl Default for PlanParams {
    fn default() -> Self {
        Self {
            tolerance: Decimal::ZERO,
            lot_sizes: LotSizes::whole_units(),
            cost_model: CostModel::zero(),
            min_trade_value: Decimal::ZERO,
            mode: RebalanceMode::BuySell,
        }
    }
}

impl PlanParams {
    pub fn validate(&self) -> Result<()> {
        if self.tolerance < Decimal::ZERO || self.tolerance >= Decimal::ONE {
            return Err(Error::InvalidParams(format!(
                "tolerance must be in [0, 1), got {}",
                self.tolerance
            )));
        }
        if self.min_trade_value < Decimal::ZERO {
            return Err(Error::InvalidParams(format!(
                "min_trade_value must be >= 0, got {}",
                self.min_trade_value
            )));
        }
        self.lot_sizes.validate()?;
        self.cost_model.validate().map_err(Error::InvalidParams)
    }
}

/// One instruction for the execution side.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TradeOrder {
    pub instrument: InstrumentId,
    pub side: Side,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// quantity × unit price at snapshot prices
    pub estimated_value: Decimal,
    pub estimated_cost: Decimal,
}

impl TradeOrder {
    /// Signed effect on cash: sells add value − cost, buys remove value + cost.
    pub fn cash_effect(&self) -> Decimal {
        Decimal::from(self.side.cash_sign()) * self.estimated_value - self.estimated_cost
    }
}

/// Why a drift did not become an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SkipReason {
    WithinTolerance,
    /// The delta is worth less than one lot.
    BelowLotSize,
    /// Not even one lot fits in the remaining cash.
    InsufficientCash,
    BelowMinimumTrade,
    /// Selling would raise less than the order costs.
    CostExceedsValue,
    /// Buy-only mode.
    SellsDisabled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::WithinTolerance => "within tolerance",
            SkipReason::BelowLotSize => "below lot size",
            SkipReason::InsufficientCash => "insufficient cash",
            SkipReason::BelowMinimumTrade => "below minimum trade",
            SkipReason::CostExceedsValue => "cost exceeds value",
            SkipReason::SellsDisabled => "sells disabled",
        };
        f.pad(s)
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SkippedTrade {
    pub instrument: InstrumentId,
    pub side: Side,
    pub delta_value: Decimal,
    pub reason: SkipReason,
}

/// Weight gap left after the plan fills at snapshot prices.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResidualDrift {
    pub instrument: InstrumentId,
    pub target_weight: Decimal,
    pub post_trade_weight: Decimal,
    /// target − post-trade
    pub residual_weight: Decimal,
}

/// Extra cash each mode would need to reach its targets without cash limits.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DepositNeeded {
    pub buy_sell: Decimal,
    /// Grows the portfolio until no target is overweight.
    pub buy_only: Decimal,
}

impl DepositNeeded {
    #[inline]
    pub fn for_mode(&self, mode: RebalanceMode) -> Decimal {
        match mode {
            RebalanceMode::BuySell => self.buy_sell,
            RebalanceMode::BuyOnly => self.buy_only,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PlanSummary {
    pub total_buys: Decimal,
    pub total_sells: Decimal,
    pub total_costs: Decimal,
    /// Σ [`TradeOrder::cash_effect`] in plan order.
    pub net_cash_change: Decimal,
    pub cash_after: Decimal,
    pub residual: Vec<ResidualDrift>,
    pub max_residual: Decimal,
    pub skipped: Vec<SkippedTrade>,
    pub deposit_needed: DepositNeeded,
}

/// Ordered orders plus summary. Owned by the caller of one run.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TradePlan {
    pub orders: Vec<TradeOrder>,
    pub summary: PlanSummary,
}

impl TradePlan {
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn buys(&self) -> impl Iterator<Item = &TradeOrder> {
        self.orders.iter().filter(|o| o.side == Side::Buy)
    }

    pub fn sells(&self) -> impl Iterator<Item = &TradeOrder> {
        self.orders.iter().filter(|o| o.side == Side::Sell)
    }
}

fn lot_overflow(quantity: Decimal, lot: Decimal) -> Error {
    Error::InvalidParams(format!("lot size {lot} is too fine for a quantity of {quantity}"))
}

/// Largest multiple of `lot` not above `quantity`.
pub fn floor_to_lot(quantity: Decimal, lot: Decimal) -> Result<Decimal> {
    let lots = quantity
        .checked_div(lot)
        .ok_or_else(|| lot_overflow(quantity, lot))?;
    lots.floor()
        .checked_mul(lot)
        .ok_or_else(|| lot_overflow(quantity, lot))
}

fn floor_delta_to_lot(quantity: Decimal, lot: Decimal) -> Result<Decimal> {
    let lots = quantity
        .checked_div(lot)
        .ok_or_else(|| lot_overflow(quantity, lot))?;
    lots.round_dp(QUANTITY_GUARD_DP)
        .floor()
        .checked_mul(lot)
        .ok_or_else(|| lot_overflow(quantity, lot))
}

/// Units of `d` that `value` buys at the snapshot price.
fn units(value: Decimal, d: &Drift) -> Result<Decimal> {
    value.checked_div(d.unit_price).ok_or_else(|| {
        Error::InvalidSnapshot(format!(
            "{}: {value} at unit price {} is out of range",
            d.instrument, d.unit_price
        ))
    })
}

/// (|delta value| desc, instrument asc)
fn priority(a: &&Drift, b: &&Drift) -> Ordering {
    b.delta_value
        .abs()
        .cmp(&a.delta_value.abs())
        .then_with(|| a.instrument.cmp(&b.instrument))
}

/// Turn a drift report into an ordered trade plan.
pub fn generate_plan(drift: &DriftReport, params: &PlanParams) -> Result<TradePlan> {
    params.validate()?;

    let cost_model = &params.cost_model;
    let mut pool = drift.cash;
    let mut orders: Vec<TradeOrder> = Vec::new();
    let mut skipped: Vec<SkippedTrade> = Vec::new();

    let mut sells: Vec<&Drift> = Vec::new();
    let mut buys: Vec<&Drift> = Vec::new();
    for d in &drift.entries {
        if d.delta_value.is_zero() {
            continue;
        }
        let side = if d.delta_value.is_sign_negative() {
            Side::Sell
        } else {
            Side::Buy
        };
        if d.delta_weight.abs() <= params.tolerance {
            skipped.push(skip(d, side, SkipReason::WithinTolerance));
            continue;
        }
        match side {
            Side::Sell => sells.push(d),
            Side::Buy => buys.push(d),
        }
    }
    sells.sort_by(priority);
    buys.sort_by(priority);

    for d in sells {
        if params.mode == RebalanceMode::BuyOnly {
            skipped.push(skip(d, Side::Sell, SkipReason::SellsDisabled));
            continue;
        }

        let lot = params.lot_sizes.get(&d.instrument);
        let mut quantity = floor_delta_to_lot(units(d.delta_value.abs(), d)?, lot)?;
        if quantity > d.held_quantity {
            let capped = floor_to_lot(d.held_quantity, lot)?;
            log::warn!(
                "{}: sell of {quantity} capped at holding, selling {capped}",
                d.instrument
            );
            quantity = capped;
        }
        if quantity.is_zero() {
            skipped.push(skip(d, Side::Sell, SkipReason::BelowLotSize));
            continue;
        }

        let value = quantity * d.unit_price;
        if value < params.min_trade_value {
            skipped.push(skip(d, Side::Sell, SkipReason::BelowMinimumTrade));
            continue;
        }
        let cost = cost_model.compute_cost(value);
        if !cost_model.is_zero() && cost >= value {
            skipped.push(skip(d, Side::Sell, SkipReason::CostExceedsValue));
            continue;
        }

        pool += value - cost;
        log::debug!("SELL {quantity} {} @ {} (pool {pool})", d.instrument, d.unit_price);
        orders.push(order(d, Side::Sell, quantity, value, cost));
    }

    for d in buys {
        let lot = params.lot_sizes.get(&d.instrument);
        let proposed = floor_delta_to_lot(units(d.delta_value, d)?, lot)?;
        if proposed.is_zero() {
            skipped.push(skip(d, Side::Buy, SkipReason::BelowLotSize));
            continue;
        }

        let mut quantity = proposed;
        let mut value = quantity * d.unit_price;
        let mut cost = cost_model.compute_cost(value);
        if value + cost > pool {
            // Cost is non-decreasing in notional, so cost(pool) bounds the
            // cost of any affordable order.
            let budget = pool - cost_model.compute_cost(pool);
            quantity = if budget > Decimal::ZERO {
                floor_to_lot(units(budget, d)?, lot)?.min(proposed)
            } else {
                Decimal::ZERO
            };
            if quantity.is_zero() {
                skipped.push(skip(d, Side::Buy, SkipReason::InsufficientCash));
                continue;
            }
            value = quantity * d.unit_price;
            cost = cost_model.compute_cost(value);
            log::debug!(
                "{}: buy reduced from {proposed} to {quantity} by available cash",
                d.instrument
            );
        }
        if value < params.min_trade_value {
            skipped.push(skip(d, Side::Buy, SkipReason::BelowMinimumTrade));
            continue;
        }

        pool -= value + cost;
        log::debug!("BUY {quantity} {} @ {} (pool {pool})", d.instrument, d.unit_price);
        orders.push(order(d, Side::Buy, quantity, value, cost));
    }

    if pool.is_sign_negative() && !pool.is_zero() {
        return Err(Error::NegativeCashAfterPlan(pool));
    }

    let summary = summarize(drift, params, &orders, skipped)?;
    log::info!(
        "plan: {} orders, net cash {:.2}, max residual drift {:.4}",
        orders.len(),
        summary.net_cash_change,
        summary.max_residual
    );

    Ok(TradePlan { orders, summary })
}

fn skip(d: &Drift, side: Side, reason: SkipReason) -> SkippedTrade {
    log::debug!("{}: {side} of {} skipped ({reason})", d.instrument, d.delta_value);
    SkippedTrade {
        instrument: d.instrument.clone(),
        side,
        delta_value: d.delta_value,
        reason,
    }
}

fn order(d: &Drift, side: Side, quantity: Decimal, value: Decimal, cost: Decimal) -> TradeOrder {
    TradeOrder {
        instrument: d.instrument.clone(),
        side,
        quantity,
        unit_price: d.unit_price,
        estimated_value: value,
        estimated_cost: cost,
    }
}

fn summarize(
    drift: &DriftReport,
    params: &PlanParams,
    orders: &[TradeOrder],
    skipped: Vec<SkippedTrade>,
) -> Result<PlanSummary> {
    let mut total_buys = Decimal::ZERO;
    let mut total_sells = Decimal::ZERO;
    let mut total_costs = Decimal::ZERO;
    let mut net_cash_change = Decimal::ZERO;
    let mut traded: FxHashMap<&InstrumentId, Decimal> = FxHashMap::default();
    for o in orders {
        match o.side {
            Side::Buy => total_buys += o.estimated_value,
            Side::Sell => total_sells += o.estimated_value,
        }
        total_costs += o.estimated_cost;
        // Same per-order fold as the validator re-derives.
        net_cash_change += o.cash_effect();
        let signed = match o.side {
            Side::Buy => o.quantity,
            Side::Sell => -o.quantity,
        };
        *traded.entry(&o.instrument).or_insert(Decimal::ZERO) += signed;
    }

    // Costs leave the portfolio; everything else just changes form.
    let post_total = drift.total_value - total_costs;
    let residual: Vec<ResidualDrift> = drift
        .entries
        .iter()
        .map(|d| {
            let traded_qty = traded.get(&d.instrument).copied().unwrap_or_default();
            let post_qty = d.held_quantity + traded_qty;
            let post_trade_weight = if post_total > Decimal::ZERO {
                post_qty * d.unit_price / post_total
            } else {
                Decimal::ZERO
            };
            ResidualDrift {
                instrument: d.instrument.clone(),
                target_weight: d.target_weight,
                post_trade_weight,
                residual_weight: d.target_weight - post_trade_weight,
            }
        })
        .collect();
    let max_residual = residual
        .iter()
        .map(|r| r.residual_weight.abs())
        .max()
        .unwrap_or(Decimal::ZERO);

    Ok(PlanSummary {
        total_buys,
        total_sells,
        total_costs,
        net_cash_change,
        cash_after: drift.cash + net_cash_change,
        residual,
        max_residual,
        skipped,
        deposit_needed: DepositNeeded {
            buy_sell: deposit_buy_sell(drift, params)?,
            buy_only: deposit_buy_only(drift, params)?,
        },
    })
}

/// Cash to add so the lot-floored trades beyond tolerance execute in full,
/// sells included.
fn deposit_buy_sell(drift: &DriftReport, params: &PlanParams) -> Result<Decimal> {
    let cost_model = &params.cost_model;
    let mut required = Decimal::ZERO;
    for d in &drift.entries {
        if d.delta_value.is_zero() || d.delta_weight.abs() <= params.tolerance {
            continue;
        }
        let lot = params.lot_sizes.get(&d.instrument);
        let mut quantity = floor_delta_to_lot(units(d.delta_value.abs(), d)?, lot)?;
        if d.delta_value.is_sign_negative() {
            quantity = quantity.min(floor_to_lot(d.held_quantity, lot)?);
        }
        if quantity.is_zero() {
            continue;
        }
        let value = quantity * d.unit_price;
        let cost = cost_model.compute_cost(value);
        if d.delta_value.is_sign_negative() {
            required -= value - cost;
        } else {
            required += value + cost;
        }
    }
    Ok((required - drift.cash).max(Decimal::ZERO))
}

/// Cash to add so that buys alone reach every target, with nothing sold.
fn deposit_buy_only(drift: &DriftReport, params: &PlanParams) -> Result<Decimal> {
    let cost_model = &params.cost_model;

    // Smallest total at which no target is overweight.
    let mut grown_total = drift.total_value;
    for d in drift.entries.iter().filter(|d| d.target_weight > Decimal::ZERO) {
        let needed = d.current_value.checked_div(d.target_weight).ok_or_else(|| {
            Error::InvalidAllocation(format!(
                "{}: target weight {} is too small to grow into",
                d.instrument, d.target_weight
            ))
        })?;
        grown_total = grown_total.max(needed);
    }

    let mut required = Decimal::ZERO;
    for d in &drift.entries {
        let gap = grown_total * d.target_weight - d.current_value;
        if gap <= Decimal::ZERO {
            continue;
        }
        let lot = params.lot_sizes.get(&d.instrument);
        let quantity = floor_delta_to_lot(units(gap, d)?, lot)?;
        if quantity.is_zero() {
            continue;
        }
        let value = quantity * d.unit_price;
        required += value + cost_model.compute_cost(value);
    }
    Ok((required - drift.cash).max(Decimal::ZERO))
}

impl fmt::Display for TradePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.orders.is_empty() {
            writeln!(f, "TRADE PLAN: no orders")?;
        } else {
            writeln!(f, "TRADE PLAN:")?;
            writeln!(
                f,
                "  {:>3}  {:4} {:12} {:>12} {:>10} {:>12} {:>8}",
                "#", "Side", "Instrument", "Quantity", "Price", "Value", "Cost"
            )?;
            for (i, o) in self.orders.iter().enumerate() {
                writeln!(
                    f,
                    "  {:>3}  {:4} {:12} {:>12} {:>10.2} {:>12.2} {:>8.2}",
                    i + 1,
                    o.side,
                    o.instrument,
                    o.quantity.normalize(),
                    o.unit_price,
                    o.estimated_value,
                    o.estimated_cost,
                )?;
            }
        }

        let s = &self.summary;
        writeln!(
            f,
            "\n  Buys {:.2}, sells {:.2}, costs {:.2}, net cash {:+.2}, cash after {:.2}",
            s.total_buys, s.total_sells, s.total_costs, s.net_cash_change, s.cash_after
        )?;
        writeln!(
            f,
            "  Max residual drift: {:.2}%",
            s.max_residual * Decimal::ONE_HUNDRED
        )?;
        writeln!(
            f,
            "  Deposit needed for buy/sell rebalancing: {:.2}",
            s.deposit_needed.buy_sell
        )?;
        writeln!(
            f,
            "  Deposit needed for buy-only rebalancing: {:.2}",
            s.deposit_needed.buy_only
        )?;
        for skipped in &s.skipped {
            writeln!(
                f,
                "  skipped {} {} ({:.2}): {}",
                skipped.side, skipped.instrument, skipped.delta_value, skipped.reason
            )?;
        }
        Ok(())
    }
}

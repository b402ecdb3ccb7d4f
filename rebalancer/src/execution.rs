//! Run orchestrator: snapshot → drift → plan → validate → confirm → submit.
//!
//! This is the main workflow that ties together all components.

use driftplan::{
    DriftReport, PortfolioSnapshot, RebalanceRequest, TradePlan, Universe, compute_drift,
    rebalance, resolve,
};
use log::info;
use rust_decimal::Decimal;

use crate::audit::{self, AuditLog};
use crate::broker::{AccountState, OrderSink, SnapshotProvider};
use crate::config::{Config, RebalanceConfig};
use crate::error::{Error, Result};
use crate::target::TargetSpec;

/// Options for a rebalance run.
pub struct RunOptions {
    pub dry_run: bool,
    pub force: bool,
    /// Target file, or the transactions file and period targets came from.
    pub target_source: String,
}

/// How a run ended when it did not fail.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every instrument is within tolerance, or no drift survives lot rounding.
    NoRebalanceNeeded(TradePlan),
    DryRun(TradePlan),
    /// The user declined at the confirmation prompt.
    Declined,
    Submitted { orders: usize },
}

struct Loaded {
    state: AccountState,
    snapshot: PortfolioSnapshot,
    universe: Universe,
}

fn load_account(config: &Config, provider: &dyn SnapshotProvider) -> Result<Loaded> {
    let state = provider.fetch()?;
    let fx = config.fx_rates()?;
    let snapshot = state.snapshot(&fx)?;
    let universe = state.universe(&snapshot, &fx)?;
    if universe.is_empty() {
        log::warn!("{}: no held or quoted instruments", provider.source());
    }
    info!(
        "snapshot as of {}: {} holdings, {} tradable, total {:.2} {}",
        state.as_of,
        snapshot.holdings().len(),
        universe.len(),
        snapshot.total_value(),
        fx.base()
    );
    Ok(Loaded {
        state,
        snapshot,
        universe,
    })
}

fn drift_for(config: &Config, target: &TargetSpec, loaded: &Loaded) -> Result<DriftReport> {
    let settings = apply_constraint_overrides(&config.rebalance, target);
    let targets = resolve(
        &target.allocation,
        &loaded.snapshot,
        &loaded.universe,
        settings.unlisted,
    )?;
    Ok(compute_drift(&loaded.snapshot, &targets, &loaded.universe)?)
}

/// Execute a full rebalance run.
pub fn run(
    config: &Config,
    target: &TargetSpec,
    provider: &dyn SnapshotProvider,
    sink: &mut dyn OrderSink,
    opts: &RunOptions,
) -> Result<RunOutcome> {
    // 1. Open audit log
    let mut audit = AuditLog::open(&config.audit_path())?;
    audit::log_run_started(
        &mut audit,
        &opts.target_source,
        &provider.source(),
        &config.account.id,
    )?;

    // 2. Load and normalize the account
    let Loaded {
        state,
        snapshot,
        universe,
    } = load_account(config, provider)?;
    audit::log_snapshot(&mut audit, state.as_of, &snapshot)?;
    println!(
        "Account {} ({}): {:.2} total, {:.2} cash",
        config.account.id,
        config.base_currency(),
        snapshot.total_value(),
        snapshot.cash(),
    );
    display_current_positions(&snapshot);

    // 3. Resolve, drift, plan and validate in one engine call
    let settings = apply_constraint_overrides(&config.rebalance, target);
    let request = RebalanceRequest {
        snapshot,
        targets: target.allocation.clone(),
        universe,
        policy: settings.unlisted,
        params: settings.plan_params(&config.cost),
    };
    let outcome = match rebalance(&request) {
        Ok(outcome) => outcome,
        Err(e) => {
            audit::log_run_failed(&mut audit, &e.to_string())?;
            return Err(e.into());
        }
    };

    audit::log_drift(&mut audit, &outcome.drift)?;
    print!("\n{}", outcome.drift);
    audit::log_plan(&mut audit, &outcome.plan)?;
    print!("\n{}", outcome.plan);

    let plan = outcome.plan;
    if plan.is_empty() {
        println!("\nNo rebalancing needed.");
        audit.log_simple("no_rebalance_needed")?;
        return Ok(RunOutcome::NoRebalanceNeeded(plan));
    }

    println!();
    print!("{}", outcome.validation);
    audit::log_validation(&mut audit, &outcome.validation)?;

    // 4. Dry run stops here
    if opts.dry_run {
        println!("\n[DRY RUN] No orders submitted.");
        return Ok(RunOutcome::DryRun(plan));
    }

    // 5. Confirm
    if !opts.force {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!("Submit {} orders?", plan.orders.len()))
            .default(false)
            .interact()
            .map_err(|e| Error::Aborted(format!("confirmation prompt failed: {e}")))?;

        audit.log(
            "user_confirmed",
            serde_json::json!({ "approved": confirmed }),
        )?;
        if !confirmed {
            println!("Aborted.");
            return Ok(RunOutcome::Declined);
        }
    }

    // 6. Hand off to the sink
    let submitted = sink.submit(&config.account.id, &plan.orders)?;
    audit::log_orders_submitted(&mut audit, submitted, &sink.destination())?;
    audit::log_run_completed(&mut audit, plan.orders.len(), submitted)?;
    println!(
        "\n{submitted} orders submitted. Audit logged to {}",
        config.audit_path().display()
    );

    Ok(RunOutcome::Submitted { orders: submitted })
}

/// Show the drift table for a target without planning.
pub fn show_drift(
    config: &Config,
    target: &TargetSpec,
    provider: &dyn SnapshotProvider,
) -> Result<DriftReport> {
    let loaded = load_account(config, provider)?;
    let drift = drift_for(config, target, &loaded)?;
    print!("{drift}");
    Ok(drift)
}

/// Show normalized holdings and cash.
pub fn show_positions(config: &Config, provider: &dyn SnapshotProvider) -> Result<()> {
    let loaded = load_account(config, provider)?;
    println!(
        "Account {} as of {}: {:.2} {} total, {:.2} cash\n",
        config.account.id,
        loaded.state.as_of.format("%Y-%m-%d %H:%M UTC"),
        loaded.snapshot.total_value(),
        config.base_currency(),
        loaded.snapshot.cash(),
    );
    display_current_positions(&loaded.snapshot);
    Ok(())
}

// === Helpers ===

fn display_current_positions(snapshot: &PortfolioSnapshot) {
    if snapshot.holdings().is_empty() {
        println!("No positions.");
        return;
    }

    let total = snapshot.total_value();
    println!("CURRENT PORTFOLIO:");
    for h in snapshot.holdings() {
        let weight = if total > Decimal::ZERO {
            h.market_value() / total
        } else {
            Decimal::ZERO
        };
        println!(
            "  {:12} {:>10} @ {:>10.2} = {:>12.2}  ({:.1}%)",
            h.instrument(),
            h.quantity().normalize(),
            h.unit_price(),
            h.market_value(),
            weight * Decimal::ONE_HUNDRED,
        );
    }
}

/// Apply the target file's per-run overrides on top of the config.
pub fn apply_constraint_overrides(base: &RebalanceConfig, target: &TargetSpec) -> RebalanceConfig {
    let mut config = base.clone();
    if let Some(ref constraints) = target.constraints {
        if let Some(tolerance) = constraints.tolerance {
            config.tolerance = tolerance;
        }
        if let Some(min_trade) = constraints.min_trade_value {
            config.min_trade_value = min_trade;
        }
        if let Some(mode) = constraints.mode {
            config.mode = mode;
        }
        if let Some(unlisted) = constraints.unlisted {
            config.unlisted = unlisted;
        }
    }
    config
}

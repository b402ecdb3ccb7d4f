//! CLI entry point for the driftplan rebalancer.

use std::path::PathBuf;
use std::process;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use driftplan_rebalancer::broker::{JsonSnapshotProvider, JsonlOrderSink};
use driftplan_rebalancer::config::Config;
use driftplan_rebalancer::error::Error;
use driftplan_rebalancer::execution::{self, RunOptions};
use driftplan_rebalancer::history::{self, ReferencePeriod};
use driftplan_rebalancer::target::TargetSpec;

#[derive(Parser)]
#[command(name = "rebalancer")]
#[command(about = "Portfolio rebalancer: account snapshot + target allocation → trade plan")]
#[command(version)]
struct Cli {
    /// Path to config.toml
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compute drift and a validated plan, confirm, and submit the orders
    Run {
        #[command(flatten)]
        target: TargetArgs,

        /// Path to the account snapshot JSON
        #[arg(long)]
        snapshot: PathBuf,

        /// Show plan without submitting
        #[arg(long)]
        dry_run: bool,

        /// Skip confirmation prompt (for automation/cron)
        #[arg(long)]
        force: bool,

        /// Order file to append to (default: <logging.dir>/<logging.orders_file>)
        #[arg(long)]
        orders: Option<PathBuf>,
    },

    /// Show current vs target weights
    Drift {
        #[command(flatten)]
        target: TargetArgs,

        /// Path to the account snapshot JSON
        #[arg(long)]
        snapshot: PathBuf,
    },

    /// Show normalized holdings and cash
    Positions {
        /// Path to the account snapshot JSON
        #[arg(long)]
        snapshot: PathBuf,
    },
}

/// Where target weights come from: a target file, or the money invested
/// per instrument over a period of a transactions export.
#[derive(Args)]
struct TargetArgs {
    /// Path to target.json
    #[arg(required_unless_present = "transactions", conflicts_with = "transactions")]
    target: Option<PathBuf>,

    /// Derive targets from a transactions JSON export instead
    #[arg(long, requires_all = ["from", "to"])]
    transactions: Option<PathBuf>,

    /// First trade date of the reference period (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Last trade date of the reference period, inclusive
    #[arg(long)]
    to: Option<NaiveDate>,
}

impl TargetArgs {
    fn load(&self) -> Result<(TargetSpec, String), Error> {
        match (&self.target, &self.transactions, self.from, self.to) {
            (Some(path), _, _, _) => Ok((TargetSpec::load(path)?, path.display().to_string())),
            (None, Some(path), Some(from), Some(to)) => {
                let period = ReferencePeriod::new(from, to)?;
                let transactions = history::load_transactions(path)?;
                let spec = TargetSpec::from_transactions(&transactions, period)?;
                Ok((spec, format!("{} ({period})", path.display())))
            }
            _ => Err(Error::Target(
                "give a target file, or --transactions with --from and --to".into(),
            )),
        }
    }
}

fn load_target(args: &TargetArgs) -> (TargetSpec, String) {
    match args.load() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading target: {e}");
            process::exit(if e.is_plan_failure() { 2 } else { 1 });
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Run {
            target,
            snapshot,
            dry_run,
            force,
            orders,
        } => {
            let (spec, target_source) = load_target(&target);
            let provider = JsonSnapshotProvider::new(&snapshot);
            let mut sink = JsonlOrderSink::new(orders.unwrap_or_else(|| config.orders_path()));
            let opts = RunOptions {
                dry_run,
                force,
                target_source,
            };
            execution::run(&config, &spec, &provider, &mut sink, &opts).map(|_| ())
        }
        Command::Drift { target, snapshot } => {
            let (spec, _) = load_target(&target);
            execution::show_drift(&config, &spec, &JsonSnapshotProvider::new(snapshot)).map(|_| ())
        }
        Command::Positions { snapshot } => {
            execution::show_positions(&config, &JsonSnapshotProvider::new(snapshot))
        }
    };

    if let Err(e) = result {
        match &e {
            e if e.is_plan_failure() => {
                eprintln!("\nAborted: {e}");
                process::exit(2);
            }
            Error::Aborted(msg) => {
                eprintln!("{msg}");
                process::exit(0);
            }
            _ => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        }
    }
}

//! Account and execution collaborators used by a rebalancer run.
//!
//! The run reads an [`AccountState`] from a [`SnapshotProvider`] and hands the
//! validated orders to an [`OrderSink`]. Both ship with file-based
//! implementations: a JSON account export in, a JSONL order file out.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use driftplan::{
    CashBalance, FxRates, PortfolioSnapshot, RawPosition, RawQuote, TradeOrder, Universe,
    build_snapshot, valuation::normalize_quotes,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Raw account state as a broker reports it, in listing currencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountState {
    pub as_of: DateTime<Utc>,
    #[serde(default)]
    pub positions: Vec<RawPosition>,
    #[serde(default)]
    pub cash: Vec<CashBalance>,
    /// Prices for instruments that may not be held.
    #[serde(default)]
    pub quotes: Vec<RawQuote>,
}

impl AccountState {
    /// Normalize positions and cash into a base-currency snapshot.
    pub fn snapshot(&self, fx: &FxRates) -> Result<PortfolioSnapshot> {
        Ok(build_snapshot(&self.positions, &self.cash, fx)?)
    }

    /// Tradable universe: every held instrument plus every quoted one.
    pub fn universe(&self, snapshot: &PortfolioSnapshot, fx: &FxRates) -> Result<Universe> {
        let quotes = normalize_quotes(&self.quotes, fx)?;
        Ok(Universe::from_snapshot(snapshot).with_quotes(quotes)?)
    }
}

/// Source of the account state for one run.
pub trait SnapshotProvider {
    fn fetch(&self) -> Result<AccountState>;

    /// Where the state comes from, for the audit trail.
    fn source(&self) -> String;
}

/// Reads an [`AccountState`] from a JSON file.
pub struct JsonSnapshotProvider {
    path: PathBuf,
}

impl JsonSnapshotProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SnapshotProvider for JsonSnapshotProvider {
    fn fetch(&self) -> Result<AccountState> {
        let contents = fs::read_to_string(&self.path).map_err(|e| Error::SnapshotRead {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn source(&self) -> String {
        self.path.display().to_string()
    }
}

/// Destination for validated orders. Submission is fire-and-forget: fills
/// are not reported back.
pub trait OrderSink {
    /// Submit orders in plan order. Returns how many were accepted.
    fn submit(&mut self, account: &str, orders: &[TradeOrder]) -> Result<usize>;

    /// Where orders go, for the audit trail.
    fn destination(&self) -> String;
}

#[derive(Serialize)]
struct OrderLine<'a> {
    ts: DateTime<Utc>,
    account: &'a str,
    seq: usize,
    #[serde(flatten)]
    order: &'a TradeOrder,
}

/// Appends one JSON object per order to a file, for an external executor.
///
/// The file is opened on each submission, so a sink that never submits
/// never touches the filesystem.
pub struct JsonlOrderSink {
    path: PathBuf,
}

impl JsonlOrderSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open(&self) -> std::io::Result<BufWriter<fs::File>> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        Ok(BufWriter::new(file))
    }

    fn sink_error(&self, e: std::io::Error) -> Error {
        Error::Sink(format!("{}: {e}", self.path.display()))
    }
}

impl OrderSink for JsonlOrderSink {
    fn submit(&mut self, account: &str, orders: &[TradeOrder]) -> Result<usize> {
        let mut writer = self.open().map_err(|e| self.sink_error(e))?;
        let ts = Utc::now();
        for (i, order) in orders.iter().enumerate() {
            let line = OrderLine {
                ts,
                account,
                seq: i + 1,
                order,
            };
            let json = serde_json::to_string(&line)?;
            writeln!(writer, "{json}").map_err(|e| self.sink_error(e))?;
        }
        writer.flush().map_err(|e| self.sink_error(e))?;
        log::info!("wrote {} orders to {}", orders.len(), self.path.display());
        Ok(orders.len())
    }

    fn destination(&self) -> String {
        self.path.display().to_string()
    }
}

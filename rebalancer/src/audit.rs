//! JSONL audit trail logging.
//!
//! Each rebalancer run appends events to an audit.jsonl file,
//! one JSON object per line.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use driftplan::{DriftReport, PortfolioSnapshot, TradePlan, ValidationReport};
use serde::Serialize;

use crate::error::Result;

/// An audit event written to the JSONL trail.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event: &'static str,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub data: serde_json::Value,
}

/// Append-only audit logger.
pub struct AuditLog {
    writer: BufWriter<std::fs::File>,
}

impl AuditLog {
    /// Open (or create) the audit log file for appending.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Log an event with arbitrary JSON data.
    pub fn log(&mut self, event: &'static str, data: serde_json::Value) -> Result<()> {
        let entry = AuditEvent {
            event,
            ts: Utc::now(),
            data,
        };
        let json = serde_json::to_string(&entry)?;
        writeln!(self.writer, "{json}")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Log a simple event with no additional data.
    pub fn log_simple(&mut self, event: &'static str) -> Result<()> {
        self.log(event, serde_json::json!({}))
    }
}

pub fn log_run_started(
    audit: &mut AuditLog,
    target_source: &str,
    snapshot_source: &str,
    account_id: &str,
) -> Result<()> {
    audit.log(
        "run_started",
        serde_json::json!({
            "target": target_source,
            "snapshot": snapshot_source,
            "account": account_id,
        }),
    )
}

pub fn log_snapshot(
    audit: &mut AuditLog,
    as_of: DateTime<Utc>,
    snapshot: &PortfolioSnapshot,
) -> Result<()> {
    let holdings: Vec<_> = snapshot
        .holdings()
        .iter()
        .map(|h| {
            serde_json::json!({
                "instrument": h.instrument(),
                "quantity": h.quantity(),
                "unit_price": h.unit_price(),
            })
        })
        .collect();

    audit.log(
        "snapshot_loaded",
        serde_json::json!({
            "as_of": as_of,
            "holdings": holdings,
            "cash": snapshot.cash(),
            "total_value": snapshot.total_value(),
        }),
    )
}

pub fn log_drift(audit: &mut AuditLog, drift: &DriftReport) -> Result<()> {
    audit.log("drift_computed", serde_json::to_value(drift)?)
}

pub fn log_plan(audit: &mut AuditLog, plan: &TradePlan) -> Result<()> {
    audit.log("plan_generated", serde_json::to_value(plan)?)
}

pub fn log_validation(audit: &mut AuditLog, report: &ValidationReport) -> Result<()> {
    let checks: Vec<_> = report
        .checks
        .iter()
        .map(|c| {
            serde_json::json!({
                "name": c.name,
                "status": c.status.to_string(),
                "detail": c.detail,
            })
        })
        .collect();

    audit.log(
        "plan_validated",
        serde_json::json!({
            "passed": !report.has_failures(),
            "checks": checks,
        }),
    )
}

pub fn log_orders_submitted(audit: &mut AuditLog, count: usize, destination: &str) -> Result<()> {
    audit.log(
        "orders_submitted",
        serde_json::json!({
            "count": count,
            "destination": destination,
        }),
    )
}

pub fn log_run_failed(audit: &mut AuditLog, error: &str) -> Result<()> {
    audit.log("run_failed", serde_json::json!({ "error": error }))
}

pub fn log_run_completed(audit: &mut AuditLog, planned: usize, submitted: usize) -> Result<()> {
    audit.log(
        "run_completed",
        serde_json::json!({
            "planned": planned,
            "submitted": submitted,
        }),
    )
}

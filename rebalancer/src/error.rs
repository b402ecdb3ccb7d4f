//! Error types for the rebalancer.

use std::path::PathBuf;

/// All errors that can occur during a rebalancer run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("target file error: {0}")]
    Target(String),

    #[error("failed to read target file {path}: {source}")]
    TargetRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read transactions file {path}: {source}")]
    TransactionsRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read snapshot file {path}: {source}")]
    SnapshotRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Valuation, allocation or plan failure from the engine.
    #[error(transparent)]
    Engine(#[from] driftplan::Error),

    #[error("order sink error: {0}")]
    Sink(String),

    #[error("execution aborted: {0}")]
    Aborted(String),

    #[error("audit log error: {0}")]
    Audit(#[from] std::io::Error),
}

impl Error {
    /// True for failures of the allocation or of the plan itself, as opposed
    /// to I/O or configuration problems.
    pub fn is_plan_failure(&self) -> bool {
        matches!(
            self,
            Error::Engine(
                driftplan::Error::InvalidAllocation(_)
                    | driftplan::Error::PlanInfeasible(_)
                    | driftplan::Error::NegativeCashAfterPlan(_)
            )
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! driftplan-rebalancer: command-line front end for the driftplan engine.
//!
//! Reads a target allocation from a JSON file (or derives one from a
//! transactions export) and an account export from a snapshot provider,
//! computes drift, generates and validates a trade plan, and hands confirmed
//! orders to an order sink with an audit trail.

pub mod audit;
pub mod broker;
pub mod config;
pub mod error;
pub mod execution;
pub mod history;
pub mod target;

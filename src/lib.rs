//! Fleet Orchestrator Library
//!
//! Configuration orchestration for firewall fleets: versioned snapshots,
//! structural diff and deep-merge patching, bulk patch jobs with partial
//! failure recovery, drift detection and cron-driven scheduling.

pub mod cli;
pub mod core;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

pub use error::{Error, Result};

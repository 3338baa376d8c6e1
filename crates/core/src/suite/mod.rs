//! Suite orchestration.
//!
//! Fans a suite out into member case runs and aggregates their outcomes
//! into one `SuiteRunRecord`.

mod config;
mod runner;
mod types;

pub use config::SuiteConfig;
pub use runner::SuiteOrchestrator;
pub use types::*;

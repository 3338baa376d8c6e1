//! Browser automation driver abstraction.
//!
//! This module provides the `AutomationDriver` / `DriverSession` traits the
//! run orchestrator drives, plus an HTTP client for an automation sidecar.

mod http;
mod types;

pub use http::HttpAutomationDriver;
pub use types::*;

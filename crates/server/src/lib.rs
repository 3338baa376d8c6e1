//! HTTP surface of the testpilot engine.

pub mod api;
pub mod metrics;
pub mod state;

//! Run orchestrator.
//!
//! Drives one test case per run through `queued -> running -> terminal`:
//! - opens a browser session and starts the frame broadcast on dispatch
//! - folds the step text through the interpreter, one action at a time
//! - records every step, persists the final record and announces each
//!   transition through the status notifier

mod config;
mod registry;
mod runner;
mod steps;
mod types;

pub use config::OrchestratorConfig;
pub use registry::{ClaimGuard, RunControl, RunRegistry, StopSignal};
pub use runner::{RunOrchestrator, SessionFrameSource};
pub use steps::{advance, segments, StepPlan};
pub use types::*;

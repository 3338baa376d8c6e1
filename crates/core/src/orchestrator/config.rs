//! Run orchestrator configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the run orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// How long finalized runs stay queryable in memory (seconds).
    /// After that, queries fall back to the durable store.
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    /// Hard cap on actions executed per run.
    /// Guards against an interpreter that never consumes its input.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Where step screenshots are written (None = not persisted).
    #[serde(default)]
    pub evidence_dir: Option<PathBuf>,

    /// Pause after each action before taking the step screenshot (milliseconds).
    #[serde(default = "default_settle")]
    pub step_settle_ms: u64,
}

fn default_retention() -> u64 {
    600 // 10 minutes
}

fn default_max_steps() -> u32 {
    200
}

fn default_settle() -> u64 {
    250
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention(),
            max_steps: default_max_steps(),
            evidence_dir: None,
            step_settle_ms: default_settle(),
        }
    }
}

//! Suite orchestrator configuration.

use serde::{Deserialize, Serialize};

/// Configuration for suite runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuiteConfig {
    /// Members submitted to the queue at once (0 = all of them).
    /// The admission queue's caps still apply on top.
    #[serde(default)]
    pub max_parallel_members: usize,
}

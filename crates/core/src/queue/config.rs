//! Admission queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the admission queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum runs in flight across all submitters.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Maximum runs in flight for a single submitter.
    #[serde(default = "default_max_per_submitter")]
    pub max_per_submitter: usize,

    /// Maximum tasks waiting in the backlog before submissions are refused.
    #[serde(default = "default_max_backlog")]
    pub max_backlog: usize,

    /// How long a dispatched task may run before it is failed (seconds).
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,

    /// Dispatch retries after a transient failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before a retried task becomes eligible again (milliseconds).
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_max_per_submitter() -> usize {
    2
}

fn default_max_backlog() -> usize {
    256
}

fn default_task_timeout() -> u64 {
    1800 // 30 minutes
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay() -> u64 {
    2000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_per_submitter: default_max_per_submitter(),
            max_backlog: default_max_backlog(),
            task_timeout_secs: default_task_timeout(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl QueueConfig {
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_max_per_submitter(mut self, max: usize) -> Self {
        self.max_per_submitter = max;
        self
    }

    pub fn with_max_backlog(mut self, max: usize) -> Self {
        self.max_backlog = max;
        self
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.max_per_submitter, 2);
        assert_eq!(config.task_timeout(), Duration::from_secs(1800));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: QueueConfig = toml::from_str("max_concurrent = 10").unwrap();
        assert_eq!(config.max_concurrent, 10);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_delay(), Duration::from_millis(2000));
    }

    #[test]
    fn test_builder() {
        let config = QueueConfig::default()
            .with_max_concurrent(1)
            .with_max_per_submitter(1)
            .with_max_backlog(3);
        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.max_backlog, 3);
    }
}

//! Types for the admission queue.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::orchestrator::{RunError, RunStatus};

/// Errors reported synchronously by `submit`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("Queue is full ({capacity} tasks waiting)")]
    QueueFull { capacity: usize },

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Queue is shutting down")]
    ShuttingDown,
}

/// Why a dispatch did not start a run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Worth retrying later (e.g. driver unavailable).
    #[error("Transient dispatch failure: {0}")]
    Transient(String),

    /// Will never succeed (e.g. unknown case).
    #[error("Dispatch rejected: {0}")]
    Rejected(String),

    /// Cancelled while the run was being started.
    #[error("Cancelled before start: {0}")]
    Cancelled(String),
}

/// What a task runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    /// A standalone case run.
    Case,
    /// One member of a suite run.
    SuiteMember { suite_run_id: String },
}

/// A unit of admitted work. Its id becomes the run id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunTask {
    pub id: String,
    pub case_id: String,
    pub submitter_id: String,
    pub kind: TaskKind,
    /// Higher dispatches first; equal priorities dispatch in submission order.
    #[serde(default)]
    pub priority: i32,
    pub queued_at: DateTime<Utc>,
    /// Dispatch attempts made so far.
    #[serde(default)]
    pub attempts: u32,
    /// Overrides the queue's task timeout (seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl RunTask {
    pub fn new(case_id: impl Into<String>, submitter_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            case_id: case_id.into(),
            submitter_id: submitter_id.into(),
            kind: TaskKind::Case,
            priority: 0,
            queued_at: Utc::now(),
            attempts: 0,
            timeout_secs: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn for_suite(mut self, suite_run_id: impl Into<String>) -> Self {
        self.kind = TaskKind::SuiteMember {
            suite_run_id: suite_run_id.into(),
        };
        self
    }

    pub fn suite_run_id(&self) -> Option<&str> {
        match &self.kind {
            TaskKind::Case => None,
            TaskKind::SuiteMember { suite_run_id } => Some(suite_run_id),
        }
    }
}

/// Resolves with the run's terminal status.
pub type RunCompletion = oneshot::Receiver<RunStatus>;

/// Where admitted tasks go.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Start a run for the task. Called once per dispatch attempt.
    async fn start(&self, task: RunTask) -> Result<RunCompletion, DispatchError>;

    /// Cooperatively cancel a started run.
    fn cancel(&self, run_id: &str) -> Result<(), RunError>;

    /// Fail a started run at its next step boundary.
    fn abort(&self, run_id: &str, reason: &str);

    /// Record a task that will never start.
    fn reject(&self, task: &RunTask, reason: &str);

    /// Record a dispatched task whose cancel landed before its run started.
    fn withdraw(&self, task: &RunTask, reason: &str);
}

/// Result of `AdmissionQueue::cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Taken out of the backlog before dispatch.
    Removed,
    /// Already dispatched; the orchestrator will cancel it.
    Delegated,
    /// The queue does not know this task.
    NotFound,
}

/// Queue introspection snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStatus {
    pub max_concurrent: usize,
    pub max_per_submitter: usize,
    pub max_backlog: usize,
    pub in_flight: usize,
    pub backlog: usize,
    /// In-flight count per submitter.
    pub per_submitter: HashMap<String, usize>,
    pub total_submitted: u64,
    pub total_dispatched: u64,
    pub total_failed: u64,
    pub shutting_down: bool,
}

//! Types for the run orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::driver::Action;
use crate::store::{EvidenceRef, StoreError};

/// Errors surfaced by run operations.
#[derive(Debug, Error)]
pub enum RunError {
    /// Run not found.
    #[error("run not found: {0}")]
    NotFound(String),

    /// Run already reached a terminal state.
    #[error("run {0} is already terminal")]
    AlreadyTerminal(String),

    /// Attempted an edge the state machine does not allow.
    #[error("invalid run transition: {from} -> {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    /// Durable store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Lifecycle state of a run.
///
/// Allowed edges: `queued -> running`, `running -> completed | failed | cancelled`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Queued, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
                | (RunStatus::Running, RunStatus::Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(RunStatus::Queued),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(format!("unknown run status: {}", other)),
        }
    }
}

/// Outcome of a single step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Passed,
    Failed,
    /// No action could be derived from the step text.
    Blocked,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Passed => "passed",
            StepOutcome::Failed => "failed",
            StepOutcome::Blocked => "blocked",
        }
    }
}

/// Result of one executed (or blocked) step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub run_id: String,
    /// Zero-based position in the run.
    pub index: u32,
    /// Human readable description (action or the unparseable text).
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    pub outcome: StepOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<EvidenceRef>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Step counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunProgress {
    pub total_steps: u32,
    pub completed_steps: u32,
    pub passed_steps: u32,
    pub failed_steps: u32,
    pub blocked_steps: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One line of the run's execution log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Live and historical record of one case execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub id: String,
    pub case_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suite_run_id: Option<String>,
    pub submitter_id: String,
    pub status: RunStatus,
    pub progress: RunProgress,
    pub queued_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default)]
    pub evidence: Vec<EvidenceRef>,
    #[serde(default)]
    pub steps: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Dispatch attempts the queue made for this run.
    #[serde(default)]
    pub attempts: u32,
}

impl RunRecord {
    /// A freshly dispatched run in `queued`.
    pub fn new(
        id: impl Into<String>,
        case_id: impl Into<String>,
        submitter_id: impl Into<String>,
        queued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            case_id: case_id.into(),
            suite_run_id: None,
            submitter_id: submitter_id.into(),
            status: RunStatus::Queued,
            progress: RunProgress::default(),
            queued_at,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            logs: Vec::new(),
            evidence: Vec::new(),
            steps: Vec::new(),
            error: None,
            attempts: 0,
        }
    }

    pub fn with_suite_run(mut self, suite_run_id: Option<String>) -> Self {
        self.suite_run_id = suite_run_id;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// A run that never started: retries exhausted or rejected at dispatch.
    ///
    /// Built directly in `failed`, without walking the state machine.
    pub fn rejected(self, error: impl Into<String>) -> Self {
        let error = error.into();
        let mut record = self.closed_unstarted(RunStatus::Failed, LogLevel::Error, error.clone());
        record.error = Some(error);
        record
    }

    /// A dispatched run cancelled before its session was usable.
    pub fn withdrawn(self, reason: impl Into<String>) -> Self {
        self.closed_unstarted(RunStatus::Cancelled, LogLevel::Warn, reason.into())
    }

    fn closed_unstarted(mut self, status: RunStatus, level: LogLevel, message: String) -> Self {
        self.status = status;
        self.finished_at = Some(Utc::now());
        self.duration_ms = Some(0);
        self.log(level, message);
        self
    }


    /// Move to `next`, stamping timestamps.
    pub fn transition(&mut self, next: RunStatus) -> Result<(), RunError> {
        if self.status.is_terminal() {
            return Err(RunError::AlreadyTerminal(self.id.clone()));
        }
        if !self.status.can_transition_to(next) {
            return Err(RunError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        match next {
            RunStatus::Running => self.started_at = Some(now),
            s if s.is_terminal() => {
                self.finished_at = Some(now);
                let start = self.started_at.unwrap_or(self.queued_at);
                self.duration_ms = Some((now - start).num_milliseconds().max(0) as u64);
            }
            _ => {}
        }
        self.status = next;
        Ok(())
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.logs.push(LogEntry {
            at: Utc::now(),
            level,
            message: message.into(),
        });
    }

    /// Make sure `total_steps` covers at least `needed` steps.
    pub fn ensure_total(&mut self, needed: u32) {
        if self.progress.total_steps < needed {
            self.progress.total_steps = needed;
        }
    }

    /// Append a step result and bump the counters.
    pub fn record_step(&mut self, step: StepResult) {
        let progress = &mut self.progress;
        progress.completed_steps += 1;
        match step.outcome {
            StepOutcome::Passed => progress.passed_steps += 1,
            StepOutcome::Failed => progress.failed_steps += 1,
            StepOutcome::Blocked => progress.blocked_steps += 1,
        }
        if progress.total_steps < progress.completed_steps {
            progress.total_steps = progress.completed_steps;
        }
        if let Some(evidence) = &step.evidence {
            self.evidence.push(evidence.clone());
        }
        self.steps.push(step);
    }
}

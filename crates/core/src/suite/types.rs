//! Types for suite runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::orchestrator::RunStatus;
use crate::queue::AdmissionError;
use crate::store::StoreError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SuiteError {
    #[error("Suite not found: {0}")]
    NotFound(String),

    #[error("Suite {0} has no cases")]
    Empty(String),

    #[error("Suite run {0} already finished")]
    AlreadyFinished(String),

    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Overall suite run status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SuiteStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SuiteStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SuiteStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SuiteStatus::Running => "running",
            SuiteStatus::Completed => "completed",
            SuiteStatus::Failed => "failed",
            SuiteStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SuiteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One member case of a suite run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuiteMember {
    pub position: usize,
    pub case_id: String,
    pub run_id: String,
    pub status: RunStatus,
    /// Handed to the admission queue yet.
    #[serde(default)]
    pub submitted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

fn rank(status: RunStatus) -> u8 {
    match status {
        RunStatus::Queued => 0,
        RunStatus::Running => 1,
        _ => 2,
    }
}

/// Aggregate of one suite execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuiteRunRecord {
    pub id: String,
    pub suite_id: String,
    pub submitter_id: String,
    pub status: SuiteStatus,
    pub total: u32,
    /// Members that completed.
    pub passed: u32,
    pub failed: u32,
    pub cancelled: u32,
    pub members: Vec<SuiteMember>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// From `started_at` to the last member's terminal event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub cancel_requested: bool,
}

impl SuiteRunRecord {
    /// A new running suite. `members` are `(case_id, run_id)` in suite order.
    pub fn new(
        id: impl Into<String>,
        suite_id: impl Into<String>,
        submitter_id: impl Into<String>,
        members: Vec<(String, String)>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let members: Vec<SuiteMember> = members
            .into_iter()
            .enumerate()
            .map(|(position, (case_id, run_id))| SuiteMember {
                position,
                case_id,
                run_id,
                status: RunStatus::Queued,
                submitted: false,
                error: None,
                finished_at: None,
            })
            .collect();

        Self {
            id: id.into(),
            suite_id: suite_id.into(),
            submitter_id: submitter_id.into(),
            status: SuiteStatus::Running,
            total: members.len() as u32,
            passed: 0,
            failed: 0,
            cancelled: 0,
            members,
            started_at,
            finished_at: None,
            duration_ms: None,
            cancel_requested: false,
        }
    }

    pub fn member(&self, run_id: &str) -> Option<&SuiteMember> {
        self.members.iter().find(|m| m.run_id == run_id)
    }

    pub fn mark_submitted(&mut self, run_id: &str) {
        if let Some(member) = self.members.iter_mut().find(|m| m.run_id == run_id) {
            member.submitted = true;
        }
    }

    /// Members not yet handed to the queue, in suite order.
    pub fn unsubmitted(&self) -> impl Iterator<Item = &SuiteMember> {
        self.members
            .iter()
            .filter(|m| !m.submitted && !m.status.is_terminal())
    }

    /// Members submitted but not finished.
    pub fn outstanding(&self) -> usize {
        self.members
            .iter()
            .filter(|m| m.submitted && !m.status.is_terminal())
            .count()
    }

    /// Fold one member status event in.
    ///
    /// A member only moves forward (`queued < running < terminal`), so the
    /// result does not depend on the order events arrive in. Returns true if
    /// the suite just finished.
    pub fn apply_member(
        &mut self,
        run_id: &str,
        status: RunStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    ) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let Some(member) = self.members.iter_mut().find(|m| m.run_id == run_id) else {
            return false;
        };
        if rank(status) <= rank(member.status) {
            return false;
        }

        member.status = status;
        if status.is_terminal() {
            member.error = error;
            member.finished_at = Some(at);
        }
        self.recount();
        self.try_finish()
    }

    /// Request cancellation. Members already finished keep their status.
    pub fn request_cancel(&mut self) {
        self.cancel_requested = true;
    }

    fn recount(&mut self) {
        let count = |status: RunStatus| {
            self.members
                .iter()
                .filter(|m| m.status == status)
                .count() as u32
        };
        let (passed, failed, cancelled) = (
            count(RunStatus::Completed),
            count(RunStatus::Failed),
            count(RunStatus::Cancelled),
        );
        self.passed = passed;
        self.failed = failed;
        self.cancelled = cancelled;
    }

    fn try_finish(&mut self) -> bool {
        if !self.members.iter().all(|m| m.status.is_terminal()) {
            return false;
        }

        self.status = if self.failed > 0 {
            SuiteStatus::Failed
        } else if self.cancel_requested {
            SuiteStatus::Cancelled
        } else {
            SuiteStatus::Completed
        };

        let finished_at = self
            .members
            .iter()
            .filter_map(|m| m.finished_at)
            .max()
            .unwrap_or(self.started_at);
        self.finished_at = Some(finished_at);
        self.duration_ms = Some((finished_at - self.started_at).num_milliseconds().max(0) as u64);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn suite(n: usize) -> SuiteRunRecord {
        let members = (0..n)
            .map(|i| (format!("case-{}", i), format!("run-{}", i)))
            .collect();
        SuiteRunRecord::new("sr-1", "suite-1", "alice", members, Utc::now())
    }

    type Event = (&'static str, RunStatus, i64);

    fn apply_all(record: &mut SuiteRunRecord, events: &[Event]) {
        let base = record.started_at;
        for (run_id, status, offset_ms) in events {
            record.apply_member(run_id, *status, None, base + Duration::milliseconds(*offset_ms));
        }
    }

    #[test]
    fn test_all_completed() {
        let mut record = suite(2);
        assert!(!record.apply_member("run-0", RunStatus::Completed, None, Utc::now()));
        assert!(record.apply_member("run-1", RunStatus::Completed, None, Utc::now()));
        assert_eq!(record.status, SuiteStatus::Completed);
        assert_eq!(record.passed, 2);
    }

    #[test]
    fn test_any_failed_fails_suite() {
        let mut record = suite(2);
        record.apply_member("run-0", RunStatus::Failed, Some("session lost".into()), Utc::now());
        record.apply_member("run-1", RunStatus::Completed, None, Utc::now());
        assert_eq!(record.status, SuiteStatus::Failed);
        assert_eq!(record.failed, 1);
        assert_eq!(record.passed, 1);
        assert_eq!(
            record.member("run-0").unwrap().error.as_deref(),
            Some("session lost")
        );
    }

    #[test]
    fn test_cancel_requested_without_failures() {
        let mut record = suite(2);
        record.request_cancel();
        record.apply_member("run-0", RunStatus::Completed, None, Utc::now());
        record.apply_member("run-1", RunStatus::Cancelled, None, Utc::now());
        assert_eq!(record.status, SuiteStatus::Cancelled);
        assert_eq!(record.cancelled, 1);
    }

    #[test]
    fn test_aggregation_is_order_independent() {
        let events: Vec<Event> = vec![
            ("run-0", RunStatus::Running, 10),
            ("run-1", RunStatus::Running, 20),
            ("run-0", RunStatus::Completed, 500),
            ("run-2", RunStatus::Running, 30),
            ("run-1", RunStatus::Failed, 900),
            ("run-2", RunStatus::Completed, 700),
        ];

        let mut reference = suite(3);
        apply_all(&mut reference, &events);

        // Every rotation and the reversal
        let mut orders: Vec<Vec<Event>> = (0..events.len())
            .map(|k| {
                let mut order = events.clone();
                order.rotate_left(k);
                order
            })
            .collect();
        orders.push(events.iter().rev().cloned().collect());

        for order in orders {
            let mut record = suite(3);
            record.started_at = reference.started_at;
            apply_all(&mut record, &order);
            assert_eq!(record.status, reference.status);
            assert_eq!(
                (record.passed, record.failed, record.cancelled),
                (reference.passed, reference.failed, reference.cancelled)
            );
            assert_eq!(record.duration_ms, Some(900));
        }
        assert_eq!(reference.status, SuiteStatus::Failed);
    }

    #[test]
    fn test_late_running_does_not_regress_terminal_member() {
        let mut record = suite(2);
        record.apply_member("run-0", RunStatus::Completed, None, Utc::now());
        record.apply_member("run-0", RunStatus::Running, None, Utc::now());
        assert_eq!(record.member("run-0").unwrap().status, RunStatus::Completed);
    }

    #[test]
    fn test_unknown_member_ignored() {
        let mut record = suite(1);
        assert!(!record.apply_member("nope", RunStatus::Completed, None, Utc::now()));
        assert_eq!(record.status, SuiteStatus::Running);
    }

    #[test]
    fn test_duration_spans_to_last_member() {
        let mut record = suite(2);
        let start = record.started_at;
        record.apply_member("run-0", RunStatus::Completed, None, start + Duration::seconds(3));
        record.apply_member("run-1", RunStatus::Completed, None, start + Duration::seconds(5));
        assert_eq!(record.duration_ms, Some(5000));
    }
}

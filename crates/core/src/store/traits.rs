//! Storage traits and shared types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::orchestrator::{RunRecord, RunStatus, StepResult};
use crate::suite::SuiteRunRecord;

/// Error type for storage operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

/// Filter for listing historical runs.
#[derive(Debug, Clone)]
pub struct RunFilter {
    pub case_id: Option<String>,
    pub suite_run_id: Option<String>,
    pub status: Option<RunStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for RunFilter {
    fn default() -> Self {
        Self {
            case_id: None,
            suite_run_id: None,
            status: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl RunFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_case(mut self, case_id: impl Into<String>) -> Self {
        self.case_id = Some(case_id.into());
        self
    }

    pub fn with_suite_run(mut self, suite_run_id: impl Into<String>) -> Self {
        self.suite_run_id = Some(suite_run_id.into());
        self
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Authoritative execution history.
///
/// Finalized records are written once; step results are written as they
/// happen so a crash mid-run still leaves partial history behind.
pub trait DurableStore: Send + Sync {
    /// Insert or replace a run record.
    fn persist_run(&self, record: &RunRecord) -> Result<(), StoreError>;

    /// Insert or replace one step result.
    fn persist_execution(&self, result: &StepResult) -> Result<(), StoreError>;

    /// Insert or replace a suite run record.
    fn persist_suite_run(&self, record: &SuiteRunRecord) -> Result<(), StoreError>;

    fn get_run(&self, id: &str) -> Result<Option<RunRecord>, StoreError>;

    fn list_runs(&self, filter: &RunFilter) -> Result<Vec<RunRecord>, StoreError>;

    /// Step results for a run, in step order.
    fn list_executions(&self, run_id: &str) -> Result<Vec<StepResult>, StoreError>;

    fn get_suite_run(&self, id: &str) -> Result<Option<SuiteRunRecord>, StoreError>;
}

/// A stored test case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestCase {
    pub id: String,
    pub name: String,
    /// Free-text steps, one per line.
    pub steps: String,
}

/// Read access to test case definitions owned by the CRUD layer.
pub trait CaseSource: Send + Sync {
    fn get_case(&self, case_id: &str) -> Result<Option<TestCase>, StoreError>;

    /// Ordered member case ids, or `None` if the suite does not exist.
    fn suite_members(&self, suite_id: &str) -> Result<Option<Vec<String>>, StoreError>;
}

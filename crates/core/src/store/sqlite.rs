//! SQLite-backed run history.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use crate::orchestrator::{RunRecord, StepResult};
use crate::suite::SuiteRunRecord;

use super::{DurableStore, RunFilter, StoreError};

/// SQLite-backed durable store.
///
/// Records are kept as JSON documents; the indexed columns exist only for
/// filtering.
pub struct SqliteRunStore {
    conn: Mutex<Connection>,
}

impl SqliteRunStore {
    /// Open (or create) the database file and tables.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                case_id TEXT NOT NULL,
                suite_run_id TEXT,
                submitter_id TEXT NOT NULL,
                status TEXT NOT NULL,
                queued_at TEXT NOT NULL,
                finished_at TEXT,
                record TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_runs_case_id ON runs(case_id);
            CREATE INDEX IF NOT EXISTS idx_runs_suite_run_id ON runs(suite_run_id);
            CREATE INDEX IF NOT EXISTS idx_runs_queued_at ON runs(queued_at);

            CREATE TABLE IF NOT EXISTS step_results (
                run_id TEXT NOT NULL,
                step_index INTEGER NOT NULL,
                outcome TEXT NOT NULL,
                result TEXT NOT NULL,
                PRIMARY KEY (run_id, step_index)
            );

            CREATE TABLE IF NOT EXISTS suite_runs (
                id TEXT PRIMARY KEY,
                suite_id TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                record TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".to_string()))
    }

    fn build_where_clause(filter: &RunFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref case_id) = filter.case_id {
            conditions.push("case_id = ?");
            params.push(Box::new(case_id.clone()));
        }

        if let Some(ref suite_run_id) = filter.suite_run_id {
            conditions.push("suite_run_id = ?");
            params.push(Box::new(suite_run_id.clone()));
        }

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }
}

impl DurableStore for SqliteRunStore {
    fn persist_run(&self, record: &RunRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO runs (id, case_id, suite_run_id, submitter_id, status, queued_at, finished_at, record) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.id,
                record.case_id,
                record.suite_run_id,
                record.submitter_id,
                record.status.as_str(),
                record.queued_at.to_rfc3339(),
                record.finished_at.map(|t| t.to_rfc3339()),
                json,
            ],
        )?;
        Ok(())
    }

    fn persist_execution(&self, result: &StepResult) -> Result<(), StoreError> {
        let json = serde_json::to_string(result)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO step_results (run_id, step_index, outcome, result) VALUES (?, ?, ?, ?)",
            params![result.run_id, result.index, result.outcome.as_str(), json],
        )?;
        Ok(())
    }

    fn persist_suite_run(&self, record: &SuiteRunRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO suite_runs (id, suite_id, status, started_at, record) VALUES (?, ?, ?, ?, ?)",
            params![
                record.id,
                record.suite_id,
                record.status.as_str(),
                record.started_at.to_rfc3339(),
                json,
            ],
        )?;
        Ok(())
    }

    fn get_run(&self, id: &str) -> Result<Option<RunRecord>, StoreError> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row("SELECT record FROM runs WHERE id = ?", params![id], |row| {
                row.get(0)
            })
            .optional()?;

        json.map(|j| serde_json::from_str(&j).map_err(StoreError::from))
            .transpose()
    }

    fn list_runs(&self, filter: &RunFilter) -> Result<Vec<RunRecord>, StoreError> {
        let conn = self.conn()?;
        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT record FROM runs {} ORDER BY queued_at DESC LIMIT ? OFFSET ?",
            where_clause
        );

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| row.get::<_, String>(0))?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(serde_json::from_str(&row?)?);
        }
        Ok(runs)
    }

    fn list_executions(&self, run_id: &str) -> Result<Vec<StepResult>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT result FROM step_results WHERE run_id = ? ORDER BY step_index ASC",
        )?;
        let rows = stmt.query_map(params![run_id], |row| row.get::<_, String>(0))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(serde_json::from_str(&row?)?);
        }
        Ok(results)
    }

    fn get_suite_run(&self, id: &str) -> Result<Option<SuiteRunRecord>, StoreError> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT record FROM suite_runs WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|j| serde_json::from_str(&j).map_err(StoreError::from))
            .transpose()
    }
}

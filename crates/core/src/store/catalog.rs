//! SQLite-backed test case catalog.
//!
//! The tables are owned by the surrounding CRUD layer; the engine only reads
//! them. The insert helpers exist for seeding and tests.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use super::{CaseSource, StoreError, TestCase};

pub struct SqliteCaseCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCaseCatalog {
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

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
            CREATE TABLE IF NOT EXISTS test_cases (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                steps TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS suites (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS suite_cases (
                suite_id TEXT NOT NULL,
                case_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (suite_id, case_id)
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

    /// Insert or replace a test case.
    pub fn insert_case(&self, case: &TestCase) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO test_cases (id, name, steps) VALUES (?, ?, ?)",
            params![case.id, case.name, case.steps],
        )?;
        Ok(())
    }

    /// Insert or replace a suite with its ordered members.
    pub fn insert_suite(
        &self,
        suite_id: &str,
        name: &str,
        case_ids: &[&str],
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO suites (id, name) VALUES (?, ?)",
            params![suite_id, name],
        )?;
        tx.execute(
            "DELETE FROM suite_cases WHERE suite_id = ?",
            params![suite_id],
        )?;
        for (position, case_id) in case_ids.iter().enumerate() {
            tx.execute(
                "INSERT INTO suite_cases (suite_id, case_id, position) VALUES (?, ?, ?)",
                params![suite_id, *case_id, position as i64],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

impl CaseSource for SqliteCaseCatalog {
    fn get_case(&self, case_id: &str) -> Result<Option<TestCase>, StoreError> {
        let conn = self.conn()?;
        let case = conn
            .query_row(
                "SELECT id, name, steps FROM test_cases WHERE id = ?",
                params![case_id],
                |row| {
                    Ok(TestCase {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        steps: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(case)
    }

    fn suite_members(&self, suite_id: &str) -> Result<Option<Vec<String>>, StoreError> {
        let conn = self.conn()?;
        let exists: Option<String> = conn
            .query_row(
                "SELECT id FROM suites WHERE id = ?",
                params![suite_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Ok(None);
        }

        let mut stmt = conn.prepare(
            "SELECT case_id FROM suite_cases WHERE suite_id = ? ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![suite_id], |row| row.get::<_, String>(0))?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(Some(members))
    }
}

//! Shared harness for engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use testpilot_core::{
    config::Config,
    orchestrator::RunRecord,
    store::{SqliteCaseCatalog, SqliteRunStore, TestCase},
    suite::SuiteRunRecord,
    testing::{fixtures, MockDriver, MockInterpreter},
    TestPilot,
};

/// Engine wired to mocks and in-memory storage.
pub struct TestHarness {
    pub engine: TestPilot,
    pub driver: MockDriver,
    pub interpreter: MockInterpreter,
    pub catalog: Arc<SqliteCaseCatalog>,
}

impl TestHarness {
    pub fn new(cases: &[TestCase]) -> Self {
        Self::with_config(fixtures::fast_config(), cases)
    }

    pub fn with_config(config: Config, cases: &[TestCase]) -> Self {
        let driver = MockDriver::new();
        let interpreter = MockInterpreter::new();
        let catalog = Arc::new(fixtures::catalog(cases));
        let store = Arc::new(SqliteRunStore::in_memory().expect("Failed to create run store"));

        let engine = TestPilot::new(
            config,
            Arc::new(driver.clone()),
            Arc::new(interpreter.clone()),
            catalog.clone(),
            store,
        );
        engine.start();

        Self {
            engine,
            driver,
            interpreter,
            catalog,
        }
    }

    /// Poll until the run reaches a terminal status.
    pub async fn wait_for_run(&self, run_id: &str) -> RunRecord {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let record = self.engine.get_run(run_id).expect("run should exist");
            if record.status.is_terminal() {
                return record;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "run {} stuck in {}",
                run_id,
                record.status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until the run is executing.
    pub async fn wait_until_running(&self, run_id: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.engine.get_run(run_id).expect("run should exist").status
            != testpilot_core::orchestrator::RunStatus::Running
        {
            assert!(tokio::time::Instant::now() < deadline, "run never started");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub async fn wait_for_suite(&self, suite_run_id: &str) -> SuiteRunRecord {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let record = self
                .engine
                .get_suite_run(suite_run_id)
                .expect("suite run should exist");
            if record.status.is_terminal() {
                return record;
            }
            assert!(tokio::time::Instant::now() < deadline, "suite never finished");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

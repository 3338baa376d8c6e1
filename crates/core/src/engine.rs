//! Engine facade.
//!
//! `TestPilot` wires the admission queue, run and suite orchestrators,
//! frame broadcaster, status notifier and durable store together and exposes
//! the operations the HTTP layer wraps.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::{Config, ConfigError};
use crate::driver::{AutomationDriver, DriverError, HttpAutomationDriver};
use crate::interpreter::{create_interpreter, InterpretError, StepInterpreter};
use crate::notifier::{ObserverFilter, StatusNotifier, StatusSubscription};
use crate::orchestrator::{RunError, RunOrchestrator, RunRecord};
use crate::queue::{AdmissionError, AdmissionQueue, CancelOutcome, QueueStatus, RunTask};
use crate::store::{
    CaseSource, DurableStore, FsEvidenceSink, RunFilter, SqliteCaseCatalog, SqliteRunStore,
    StoreError,
};
use crate::stream::{
    FrameBroadcaster, StreamError, StreamStats, StreamSubscription, StreamToken,
    StreamTokenIssuer,
};
use crate::suite::{SuiteError, SuiteOrchestrator, SuiteRunRecord};

/// Result codes of the exposed operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    Accepted,
    QueueFull,
    NotFound,
    AlreadyTerminal,
    Forbidden,
}

impl ResultCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultCode::Accepted => "ACCEPTED",
            ResultCode::QueueFull => "QUEUE_FULL",
            ResultCode::NotFound => "NOT_FOUND",
            ResultCode::AlreadyTerminal => "ALREADY_TERMINAL",
            ResultCode::Forbidden => "FORBIDDEN",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already terminal: {0}")]
    AlreadyTerminal(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Interpreter(#[from] InterpretError),
}

impl EngineError {
    /// The exposed result code, if the error maps onto one.
    pub fn result_code(&self) -> Option<ResultCode> {
        match self {
            EngineError::NotFound(_) => Some(ResultCode::NotFound),
            EngineError::AlreadyTerminal(_) => Some(ResultCode::AlreadyTerminal),
            EngineError::Forbidden(_) => Some(ResultCode::Forbidden),
            EngineError::Admission(AdmissionError::QueueFull { .. }) => Some(ResultCode::QueueFull),
            _ => None,
        }
    }
}

impl From<RunError> for EngineError {
    fn from(e: RunError) -> Self {
        match e {
            RunError::NotFound(id) => EngineError::NotFound(id),
            RunError::AlreadyTerminal(id) => EngineError::AlreadyTerminal(id),
            RunError::InvalidTransition { from, .. } => {
                EngineError::AlreadyTerminal(format!("run is {}", from))
            }
            RunError::Store(e) => EngineError::Store(e),
        }
    }
}

impl From<SuiteError> for EngineError {
    fn from(e: SuiteError) -> Self {
        match e {
            SuiteError::NotFound(id) => EngineError::NotFound(id),
            SuiteError::Empty(id) => {
                EngineError::Admission(AdmissionError::InvalidTask(format!("suite {} has no cases", id)))
            }
            SuiteError::AlreadyFinished(id) => EngineError::AlreadyTerminal(id),
            SuiteError::Admission(e) => EngineError::Admission(e),
            SuiteError::Store(e) => EngineError::Store(e),
        }
    }
}

impl From<StreamError> for EngineError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::Forbidden(reason) => EngineError::Forbidden(reason),
            StreamError::NotStreaming(id) => EngineError::NotFound(format!("stream for run {}", id)),
            other => EngineError::NotFound(other.to_string()),
        }
    }
}

/// The assembled engine.
pub struct TestPilot {
    config: Config,
    cases: Arc<dyn CaseSource>,
    store: Arc<dyn DurableStore>,
    notifier: Arc<StatusNotifier>,
    broadcaster: Arc<FrameBroadcaster>,
    orchestrator: Arc<RunOrchestrator>,
    queue: AdmissionQueue,
    suites: SuiteOrchestrator,
    tokens: StreamTokenIssuer,
}

impl TestPilot {
    /// Assemble the engine around the given collaborators.
    pub fn new(
        config: Config,
        driver: Arc<dyn AutomationDriver>,
        interpreter: Arc<dyn StepInterpreter>,
        cases: Arc<dyn CaseSource>,
        store: Arc<dyn DurableStore>,
    ) -> Self {
        let notifier = Arc::new(StatusNotifier::new());
        let broadcaster = Arc::new(FrameBroadcaster::new(config.stream.clone()));

        let mut orchestrator = RunOrchestrator::new(
            config.orchestrator.clone(),
            driver,
            interpreter,
            cases.clone(),
            store.clone(),
            broadcaster.clone(),
            notifier.clone(),
        );
        if let Some(dir) = &config.orchestrator.evidence_dir {
            orchestrator = orchestrator.with_evidence_sink(Arc::new(FsEvidenceSink::new(dir)));
        }
        let orchestrator = Arc::new(orchestrator);

        let queue = AdmissionQueue::new(
            config.queue.clone(),
            orchestrator.clone(),
            notifier.clone(),
        );
        let suites = SuiteOrchestrator::new(
            config.suite.clone(),
            queue.clone(),
            cases.clone(),
            store.clone(),
            notifier.clone(),
        );
        let tokens = StreamTokenIssuer::new(&config.stream.token_secret, config.stream.token_ttl_secs);

        Self {
            config,
            cases,
            store,
            notifier,
            broadcaster,
            orchestrator,
            queue,
            suites,
            tokens,
        }
    }

    /// Assemble the engine from configuration: SQLite store and catalog,
    /// HTTP automation driver and the configured interpreter.
    pub fn from_config(config: Config) -> Result<Self, EngineError> {
        let store = Arc::new(SqliteRunStore::new(&config.database.path)?);
        let cases = Arc::new(SqliteCaseCatalog::new(&config.database.path)?);
        let driver = Arc::new(HttpAutomationDriver::new(&config.driver)?);
        let interpreter = create_interpreter(&config.interpreter)?;

        info!(
            database = %config.database.path.display(),
            driver = %config.driver.url,
            interpreter = interpreter.name(),
            "Engine collaborators ready"
        );
        Ok(Self::new(config, driver, interpreter, cases, store))
    }

    /// Start background maintenance.
    pub fn start(&self) {
        self.orchestrator.start();
    }

    /// Refuse new work, withdraw the backlog, cancel live runs and end
    /// every stream.
    pub fn shutdown(&self) {
        self.queue.shutdown();
        self.orchestrator.stop();
        self.broadcaster.shutdown();
        info!("Engine shut down");
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn notifier(&self) -> &Arc<StatusNotifier> {
        &self.notifier
    }

    pub fn broadcaster(&self) -> &Arc<FrameBroadcaster> {
        &self.broadcaster
    }

    pub fn queue(&self) -> &AdmissionQueue {
        &self.queue
    }

    /// Submit one case run. Returns the run id.
    pub fn submit_run(
        &self,
        case_id: &str,
        submitter_id: &str,
        priority: i32,
    ) -> Result<String, EngineError> {
        if self.cases.get_case(case_id)?.is_none() {
            return Err(EngineError::NotFound(format!("case {}", case_id)));
        }
        let task = RunTask::new(case_id, submitter_id).with_priority(priority);
        Ok(self.queue.submit(task)?)
    }

    /// Submit a whole suite. Returns the suite run id.
    pub fn submit_suite(&self, suite_id: &str, submitter_id: &str) -> Result<String, EngineError> {
        Ok(self.suites.run_suite(suite_id, submitter_id)?)
    }

    /// Cancel a run, queued or running.
    pub fn cancel_run(&self, run_id: &str) -> Result<ResultCode, EngineError> {
        match self.queue.cancel(run_id)? {
            CancelOutcome::Removed | CancelOutcome::Delegated => Ok(ResultCode::Accepted),
            CancelOutcome::NotFound => {
                self.orchestrator.cancel_run(run_id)?;
                Ok(ResultCode::Accepted)
            }
        }
    }

    pub fn cancel_suite(&self, suite_run_id: &str) -> Result<ResultCode, EngineError> {
        self.suites.cancel_suite(suite_run_id)?;
        Ok(ResultCode::Accepted)
    }

    /// Current view of a run: live, waiting in the queue, or historical.
    pub fn get_run(&self, run_id: &str) -> Result<RunRecord, EngineError> {
        if let Some(record) = self.orchestrator.get_run(run_id)? {
            return Ok(record);
        }
        // Not started yet: synthesize the queued view
        if let Some(task) = self.queue.task(run_id) {
            return Ok(
                RunRecord::new(&task.id, &task.case_id, &task.submitter_id, task.queued_at)
                    .with_suite_run(task.suite_run_id().map(str::to_string))
                    .with_attempts(task.attempts),
            );
        }
        Err(EngineError::NotFound(format!("run {}", run_id)))
    }

    pub fn list_runs(&self, filter: &RunFilter) -> Result<Vec<RunRecord>, EngineError> {
        Ok(self.store.list_runs(filter)?)
    }

    /// Runs currently executing.
    pub fn active_runs(&self) -> Vec<RunRecord> {
        self.orchestrator.active_runs()
    }

    pub fn get_suite_run(&self, suite_run_id: &str) -> Result<SuiteRunRecord, EngineError> {
        self.suites
            .get_suite_run(suite_run_id)?
            .ok_or_else(|| EngineError::NotFound(format!("suite run {}", suite_run_id)))
    }

    pub fn active_suite_runs(&self) -> Vec<SuiteRunRecord> {
        self.suites.active_suite_runs()
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    /// Mint a stream token for a run that is not finished.
    pub fn issue_stream_token(&self, run_id: &str) -> Result<StreamToken, EngineError> {
        let record = self.get_run(run_id)?;
        if record.status.is_terminal() {
            return Err(EngineError::AlreadyTerminal(run_id.to_string()));
        }
        Ok(self.tokens.issue(run_id)?)
    }

    /// Attach a viewer to a run's live frames after checking its token.
    pub fn open_stream(
        &self,
        run_id: &str,
        token: Option<&str>,
        viewer: &str,
    ) -> Result<StreamSubscription, EngineError> {
        let token = token.ok_or_else(|| EngineError::Forbidden("missing stream token".into()))?;
        self.tokens.verify(run_id, token)?;
        Ok(self.broadcaster.subscribe_channel(run_id, viewer)?)
    }

    pub fn stream_stats(&self, run_id: &str) -> Option<StreamStats> {
        self.broadcaster.stats(run_id)
    }

    /// Live status events. `None` follows every run.
    pub fn subscribe_status(&self, run_id: Option<&str>) -> StatusSubscription {
        let filter = match run_id {
            Some(id) => ObserverFilter::Run(id.to_string()),
            None => ObserverFilter::All,
        };
        self.notifier.subscribe(filter)
    }
}

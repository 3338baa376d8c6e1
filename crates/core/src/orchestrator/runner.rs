//! Run orchestrator implementation.
//!
//! `start` opens a browser session, moves the run to `running` and spawns
//! one worker per run. The worker folds the case's step text through the
//! interpreter, executes each action, captures evidence and publishes every
//! state change. Cancellation and queue aborts are honored between steps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};

use crate::driver::{Action, AutomationDriver, DriverError, DriverSession, PageContext};
use crate::interpreter::StepInterpreter;
use crate::metrics;
use crate::notifier::{StatusNotifier, StatusUpdate};
use crate::queue::{DispatchError, RunCompletion, RunTask, TaskDispatcher};
use crate::store::{CaseSource, DurableStore, EvidenceRef, EvidenceSink, TestCase};
use crate::stream::{FrameBroadcaster, FrameSource, StreamError};

use super::config::OrchestratorConfig;
use super::registry::{ClaimGuard, RunControl, RunRegistry, StopSignal};
use super::steps::{advance, segments, StepPlan};
use super::types::{LogLevel, RunError, RunRecord, RunStatus, StepOutcome, StepResult};

/// Streams screenshots from a run's session.
pub struct SessionFrameSource {
    session: Arc<dyn DriverSession>,
}

impl SessionFrameSource {
    pub fn new(session: Arc<dyn DriverSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl FrameSource for SessionFrameSource {
    async fn capture_frame(&self) -> Result<Bytes, StreamError> {
        self.session
            .capture_frame()
            .await
            .map_err(|e| StreamError::Capture(e.to_string()))
    }
}

/// Collaborators shared by every run worker.
#[derive(Clone)]
struct Services {
    config: OrchestratorConfig,
    interpreter: Arc<dyn StepInterpreter>,
    store: Arc<dyn DurableStore>,
    evidence: Option<Arc<dyn EvidenceSink>>,
    broadcaster: Arc<FrameBroadcaster>,
    notifier: Arc<StatusNotifier>,
    registry: Arc<RunRegistry>,
}

/// How a run ended.
struct Finish {
    status: RunStatus,
    error: Option<String>,
}

impl Finish {
    fn completed() -> Self {
        Self {
            status: RunStatus::Completed,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failed,
            error: Some(error.into()),
        }
    }

    fn from_signal(signal: StopSignal) -> Self {
        match signal {
            StopSignal::Cancel => Self {
                status: RunStatus::Cancelled,
                error: None,
            },
            StopSignal::Abort(reason) => Self::failed(reason),
        }
    }
}

/// Drives admitted tasks through the run state machine.
pub struct RunOrchestrator {
    services: Services,
    driver: Arc<dyn AutomationDriver>,
    cases: Arc<dyn CaseSource>,

    // Runtime state
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RunOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        driver: Arc<dyn AutomationDriver>,
        interpreter: Arc<dyn StepInterpreter>,
        cases: Arc<dyn CaseSource>,
        store: Arc<dyn DurableStore>,
        broadcaster: Arc<FrameBroadcaster>,
        notifier: Arc<StatusNotifier>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            services: Services {
                config,
                interpreter,
                store,
                evidence: None,
                broadcaster,
                notifier,
                registry: Arc::new(RunRegistry::new()),
            },
            driver,
            cases,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Persist step screenshots through `sink`.
    pub fn with_evidence_sink(mut self, sink: Arc<dyn EvidenceSink>) -> Self {
        self.services.evidence = Some(sink);
        self
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.services.registry
    }

    /// Start background maintenance (retention sweep).
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Run orchestrator already running");
            return;
        }

        let registry = self.services.registry.clone();
        let retention = Duration::from_secs(self.services.config.retention_secs);
        let period = retention.clamp(Duration::from_secs(1), Duration::from_secs(60));
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Retention sweep shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = registry.sweep(retention, tokio::time::Instant::now());
                        if evicted > 0 {
                            debug!(evicted, "Evicted finished runs from memory");
                        }
                    }
                }
            }
        });

        info!("Run orchestrator started");
    }

    /// Stop maintenance and ask every live run to cancel.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            let _ = self.shutdown_tx.send(());
        }

        let controls = self.services.registry.active_controls();
        for control in &controls {
            control.cancel();
        }
        info!(cancelled = controls.len(), "Run orchestrator stopped");
    }

    /// A live run's snapshot, else the stored record.
    pub fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, RunError> {
        if let Some(record) = self.services.registry.snapshot(run_id) {
            return Ok(Some(record));
        }
        Ok(self.services.store.get_run(run_id)?)
    }

    /// Snapshots of runs currently executing.
    pub fn active_runs(&self) -> Vec<RunRecord> {
        self.services.registry.active()
    }

    /// Request cooperative cancellation.
    pub fn cancel_run(&self, run_id: &str) -> Result<(), RunError> {
        let registry = &self.services.registry;
        if let Some(control) = registry.control(run_id) {
            if control.cancel() {
                info!(run_id, "Cancellation requested");
            }
            return Ok(());
        }
        if registry.is_finished(run_id) == Some(true) {
            return Err(RunError::AlreadyTerminal(run_id.to_string()));
        }
        match self.services.store.get_run(run_id)? {
            Some(record) if record.status.is_terminal() => {
                Err(RunError::AlreadyTerminal(run_id.to_string()))
            }
            _ => Err(RunError::NotFound(run_id.to_string())),
        }
    }

    fn load_case(&self, case_id: &str) -> Result<TestCase, DispatchError> {
        match self.cases.get_case(case_id) {
            Ok(Some(case)) => Ok(case),
            Ok(None) => Err(DispatchError::Rejected(format!("unknown case {}", case_id))),
            Err(e) => Err(DispatchError::Transient(format!("case lookup failed: {}", e))),
        }
    }
}

#[async_trait]
impl TaskDispatcher for RunOrchestrator {
    async fn start(&self, task: RunTask) -> Result<RunCompletion, DispatchError> {
        let registry = &self.services.registry;
        let claim = registry
            .claim_guarded(&task.id)
            .ok_or_else(|| DispatchError::Rejected(format!("run {} is already active", task.id)))?;

        let case = self
            .load_case(&task.case_id)
            .map_err(|e| start_failed(&claim, e))?;

        let session = match self.driver.open_session(&task.id).await {
            Ok(session) => session,
            Err(e) => {
                let error = match e {
                    DriverError::Unavailable(_)
                    | DriverError::Timeout
                    | DriverError::SessionLost(_) => DispatchError::Transient(e.to_string()),
                    other => DispatchError::Rejected(other.to_string()),
                };
                return Err(start_failed(&claim, error));
            }
        };

        let mut record = RunRecord::new(
            &task.id,
            &task.case_id,
            &task.submitter_id,
            task.queued_at,
        )
        .with_suite_run(task.suite_run_id().map(str::to_string))
        .with_attempts(task.attempts);

        if let Err(e) = record.transition(RunStatus::Running) {
            // A fresh record is always queued
            if let Err(close_err) = session.close_session().await {
                warn!(run_id = %task.id, error = %close_err, "Failed to close session");
            }
            return Err(DispatchError::Rejected(e.to_string()));
        }
        let control = claim.keep();
        record.log(
            LogLevel::Info,
            format!(
                "session {} opened via {}",
                session.session_id(),
                self.driver.name()
            ),
        );
        registry.update(&record);

        metrics::RUNS_STARTED.inc();
        info!(
            run_id = %record.id,
            case_id = %record.case_id,
            session_id = session.session_id(),
            attempt = task.attempts,
            "Run started"
        );
        self.services.notifier.publish_update(
            StatusUpdate::new(&record.id, RunStatus::Running)
                .with_case(&record.case_id)
                .with_suite_run(record.suite_run_id.clone()),
        );
        self.services.broadcaster.start_broadcast(
            &record.id,
            Arc::new(SessionFrameSource::new(session.clone())),
        );

        let (done_tx, done_rx) = oneshot::channel();
        let worker = RunWorker {
            services: self.services.clone(),
            control,
            session,
            record,
        };
        tokio::spawn(async move {
            let status = worker.run(case).await;
            let _ = done_tx.send(status);
        });

        Ok(done_rx)
    }

    fn cancel(&self, run_id: &str) -> Result<(), RunError> {
        self.cancel_run(run_id)
    }

    fn abort(&self, run_id: &str, reason: &str) {
        if let Some(control) = self.services.registry.control(run_id) {
            warn!(run_id, reason, "Aborting run");
            control.abort(reason);
        }
    }

    fn withdraw(&self, task: &RunTask, reason: &str) {
        let record = RunRecord::new(&task.id, &task.case_id, &task.submitter_id, task.queued_at)
            .with_suite_run(task.suite_run_id().map(str::to_string))
            .with_attempts(task.attempts)
            .withdrawn(reason);

        if let Err(e) = self.services.store.persist_run(&record) {
            error!(run_id = %record.id, error = %e, "Failed to persist withdrawn run");
        }
        metrics::RUNS_FINISHED
            .with_label_values(&[RunStatus::Cancelled.as_str()])
            .inc();
        info!(run_id = %record.id, reason, "Run cancelled before start");

        let update = StatusUpdate::new(&record.id, RunStatus::Cancelled)
            .with_case(&record.case_id)
            .with_suite_run(record.suite_run_id.clone());
        self.services.registry.finish(record);
        self.services.notifier.publish_update(update);
    }

    fn reject(&self, task: &RunTask, reason: &str) {
        let record = RunRecord::new(&task.id, &task.case_id, &task.submitter_id, task.queued_at)
            .with_suite_run(task.suite_run_id().map(str::to_string))
            .with_attempts(task.attempts)
            .rejected(reason);

        if let Err(e) = self.services.store.persist_run(&record) {
            error!(run_id = %record.id, error = %e, "Failed to persist rejected run");
        }
        metrics::RUNS_FINISHED
            .with_label_values(&[RunStatus::Failed.as_str()])
            .inc();
        warn!(run_id = %record.id, reason, "Run rejected before start");

        let update = StatusUpdate::new(&record.id, RunStatus::Failed)
            .with_case(&record.case_id)
            .with_suite_run(record.suite_run_id.clone())
            .with_error(record.error.clone());
        self.services.registry.finish(record);
        self.services.notifier.publish_update(update);
    }
}

/// A cancel that landed while starting wins over the start error.
fn start_failed(claim: &ClaimGuard, error: DispatchError) -> DispatchError {
    if claim.control().is_cancelled() {
        DispatchError::Cancelled(error.to_string())
    } else {
        error
    }
}

/// Owns one run's record for the lifetime of its step loop.
struct RunWorker {
    services: Services,
    control: Arc<RunControl>,
    session: Arc<dyn DriverSession>,
    record: RunRecord,
}

impl RunWorker {
    async fn run(mut self, case: TestCase) -> RunStatus {
        let finish = self.execute_steps(&case).await;
        self.finalize(finish).await
    }

    async fn execute_steps(&mut self, case: &TestCase) -> Finish {
        let segments = segments(&case.steps);
        self.record.ensure_total(segments.len() as u32);
        self.record.log(
            LogLevel::Info,
            format!("{} step segments in case {}", segments.len(), case.name),
        );
        self.publish_snapshot();

        let max_steps = self.services.config.max_steps;
        let mut index: u32 = 0;

        for (position, segment) in segments.iter().enumerate() {
            let segments_after = (segments.len() - position - 1) as u32;
            let mut remaining = segment.clone();

            while !remaining.is_empty() {
                if let Some(signal) = self.control.check() {
                    return Finish::from_signal(signal);
                }
                if index >= max_steps {
                    return Finish::failed(format!("step limit of {} reached", max_steps));
                }

                let context = match self.session.page_context().await {
                    Ok(context) => context,
                    Err(e) if e.is_fatal() => return Finish::failed(e.to_string()),
                    Err(e) => {
                        debug!(run_id = %self.record.id, error = %e, "No page context");
                        PageContext::default()
                    }
                };

                let parsed = match self
                    .services
                    .interpreter
                    .parse_next(&remaining, &context)
                    .await
                {
                    Ok(parsed) => parsed,
                    Err(e) => return Finish::failed(e.to_string()),
                };

                self.record
                    .ensure_total(self.record.progress.completed_steps + 1 + segments_after);

                match advance(&remaining, parsed) {
                    StepPlan::Blocked { reason } => {
                        self.record_blocked(index, &remaining, reason);
                        index += 1;
                        break;
                    }
                    StepPlan::Execute { action, rest } => {
                        let fatal = self.execute_action(index, &action).await;
                        index += 1;
                        if let Some(error) = fatal {
                            return Finish::failed(error.to_string());
                        }
                        remaining = rest;
                    }
                }
            }
        }

        match self.control.check() {
            Some(signal) => Finish::from_signal(signal),
            None => Finish::completed(),
        }
    }

    fn record_blocked(&mut self, index: u32, remaining: &str, reason: String) {
        warn!(run_id = %self.record.id, step = index, reason = %reason, "Step blocked");
        let step = StepResult {
            run_id: self.record.id.clone(),
            index,
            description: remaining.to_string(),
            action: None,
            outcome: StepOutcome::Blocked,
            detail: Some(reason),
            evidence: None,
            started_at: Utc::now(),
            duration_ms: 0,
        };
        self.commit_step(step);
    }

    /// Run one action. Returns the error if it ended the session.
    async fn execute_action(&mut self, index: u32, action: &Action) -> Option<DriverError> {
        let started_at = Utc::now();
        let timer = StdInstant::now();
        debug!(run_id = %self.record.id, step = index, action = %action.describe(), "Executing step");

        let (outcome, detail, fatal) = match self.session.execute(action).await {
            Ok(result) if result.success => (StepOutcome::Passed, result.detail, None),
            Ok(result) => (StepOutcome::Failed, result.detail, None),
            Err(e) if e.is_fatal() => (StepOutcome::Failed, e.to_string(), Some(e)),
            Err(e) => (StepOutcome::Failed, e.to_string(), None),
        };
        let elapsed = timer.elapsed();
        metrics::STEP_DURATION
            .with_label_values(&[action.kind()])
            .observe(elapsed.as_secs_f64());

        if outcome == StepOutcome::Failed {
            warn!(run_id = %self.record.id, step = index, detail = %detail, "Step failed");
        }

        let evidence = if fatal.is_none() {
            self.capture_evidence(index).await
        } else {
            None
        };

        let step = StepResult {
            run_id: self.record.id.clone(),
            index,
            description: action.describe(),
            action: Some(action.clone()),
            outcome,
            detail: Some(detail).filter(|d| !d.is_empty()),
            evidence,
            started_at,
            duration_ms: elapsed.as_millis() as u64,
        };
        self.commit_step(step);
        fatal
    }

    async fn capture_evidence(&mut self, index: u32) -> Option<EvidenceRef> {
        let settle = self.services.config.step_settle_ms;
        if settle > 0 {
            tokio::time::sleep(Duration::from_millis(settle)).await;
        }

        let frame = match self.session.capture_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(run_id = %self.record.id, step = index, error = %e, "Step screenshot failed");
                return None;
            }
        };

        let evidence = match &self.services.evidence {
            Some(sink) => match sink.store(&self.record.id, index, &frame).await {
                Ok(evidence) => Some(evidence),
                Err(e) => {
                    warn!(run_id = %self.record.id, step = index, error = %e, "Failed to store evidence");
                    None
                }
            },
            None => None,
        };

        if let Err(e) = self
            .services
            .broadcaster
            .publish_frame(&self.record.id, frame)
            .await
        {
            debug!(run_id = %self.record.id, error = %e, "Step frame not broadcast");
        }
        evidence
    }

    fn commit_step(&mut self, step: StepResult) {
        metrics::STEP_OUTCOMES
            .with_label_values(&[step.outcome.as_str()])
            .inc();
        if let Err(e) = self.services.store.persist_execution(&step) {
            error!(run_id = %self.record.id, step = step.index, error = %e, "Failed to persist step result");
        }
        self.record.record_step(step);
        self.publish_snapshot();
    }

    fn publish_snapshot(&self) {
        self.services.registry.update(&self.record);
    }

    async fn finalize(mut self, finish: Finish) -> RunStatus {
        let run_id = self.record.id.clone();

        if let Err(e) = self.session.close_session().await {
            warn!(run_id = %run_id, error = %e, "Failed to close session");
        }
        self.services.broadcaster.stop_broadcast(&run_id);

        match &finish.error {
            Some(error) => {
                self.record.log(LogLevel::Error, error.clone());
                self.record.error = Some(error.clone());
            }
            None if finish.status == RunStatus::Cancelled => {
                self.record.log(LogLevel::Warn, "cancelled");
            }
            None => {}
        }
        if let Err(e) = self.record.transition(finish.status) {
            error!(run_id = %run_id, error = %e, "Invalid final transition");
        }

        let status = self.record.status;
        let duration = self.record.duration_ms.unwrap_or(0);
        match status {
            RunStatus::Failed => error!(
                run_id = %run_id,
                error = self.record.error.as_deref().unwrap_or(""),
                "Run failed"
            ),
            _ => info!(
                run_id = %run_id,
                status = %status,
                passed = self.record.progress.passed_steps,
                failed = self.record.progress.failed_steps,
                blocked = self.record.progress.blocked_steps,
                duration_ms = duration,
                "Run finished"
            ),
        }

        if let Err(e) = self.services.store.persist_run(&self.record) {
            error!(run_id = %run_id, error = %e, "Failed to persist run");
        }
        metrics::RUNS_FINISHED
            .with_label_values(&[status.as_str()])
            .inc();
        metrics::RUN_DURATION
            .with_label_values(&[status.as_str()])
            .observe(duration as f64 / 1000.0);

        let update = StatusUpdate::new(&run_id, status)
            .with_case(&self.record.case_id)
            .with_suite_run(self.record.suite_run_id.clone())
            .with_error(self.record.error.clone());
        self.services.registry.finish(self.record);
        self.services.notifier.publish_update(update);

        status
    }
}

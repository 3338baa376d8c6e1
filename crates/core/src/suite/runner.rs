//! Suite orchestrator implementation.
//!
//! A suite run submits its member cases to the admission queue and follows
//! their status events. Members may finish in any order; the aggregate is
//! folded per event and persisted once every member is terminal.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::notifier::{ObserverFilter, StatusNotifier, StatusSubscription};
use crate::orchestrator::RunStatus;
use crate::queue::{AdmissionQueue, RunTask};
use crate::store::{CaseSource, DurableStore};

use super::config::SuiteConfig;
use super::types::{SuiteError, SuiteRunRecord};

struct SuiteEntry {
    record: SuiteRunRecord,
    /// Members waiting for a submission window.
    pending: VecDeque<RunTask>,
}

struct SuiteShared {
    config: SuiteConfig,
    queue: AdmissionQueue,
    store: Arc<dyn DurableStore>,
    suites: Mutex<HashMap<String, SuiteEntry>>,
}

impl SuiteShared {
    fn suites(&self) -> MutexGuard<'_, HashMap<String, SuiteEntry>> {
        self.suites
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_active(&self, suite_run_id: &str) -> bool {
        self.suites().contains_key(suite_run_id)
    }

    /// Submit members while the window allows. Returns true if the suite
    /// finished along the way.
    fn submit_ready(&self, suite_run_id: &str) -> bool {
        loop {
            let task = {
                let mut suites = self.suites();
                let Some(entry) = suites.get_mut(suite_run_id) else {
                    return true;
                };
                if entry.record.cancel_requested {
                    return false;
                }
                let limit = self.config.max_parallel_members;
                if limit > 0 && entry.record.outstanding() >= limit {
                    return false;
                }
                let Some(task) = entry.pending.pop_front() else {
                    return false;
                };
                entry.record.mark_submitted(&task.id);
                task
            };

            if let Err(e) = self.queue.submit(task.clone()) {
                warn!(
                    suite_run_id,
                    run_id = %task.id,
                    error = %e,
                    "Suite member not admitted"
                );
                if self.apply(
                    suite_run_id,
                    &task.id,
                    RunStatus::Failed,
                    Some(e.to_string()),
                    Utc::now(),
                ) {
                    return true;
                }
            }
        }
    }

    /// Fold one member event. Returns true if the suite just finished.
    fn apply(
        &self,
        suite_run_id: &str,
        run_id: &str,
        status: RunStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    ) -> bool {
        let (finished, snapshot) = {
            let mut suites = self.suites();
            let Some(entry) = suites.get_mut(suite_run_id) else {
                return false;
            };
            let finished = entry.record.apply_member(run_id, status, error, at);
            let snapshot = if finished {
                suites.remove(suite_run_id).map(|entry| entry.record)
            } else if status.is_terminal() {
                Some(entry.record.clone())
            } else {
                None
            };
            (finished, snapshot)
        };

        if let Some(record) = snapshot {
            if let Err(e) = self.store.persist_suite_run(&record) {
                error!(suite_run_id, error = %e, "Failed to persist suite run");
            }
            if finished {
                metrics::SUITE_RUNS_FINISHED
                    .with_label_values(&[record.status.as_str()])
                    .inc();
                info!(
                    suite_run_id,
                    status = %record.status,
                    passed = record.passed,
                    failed = record.failed,
                    cancelled = record.cancelled,
                    duration_ms = record.duration_ms.unwrap_or(0),
                    "Suite run finished"
                );
            }
        }
        finished
    }
}

/// Runs whole suites through the admission queue.
pub struct SuiteOrchestrator {
    shared: Arc<SuiteShared>,
    cases: Arc<dyn CaseSource>,
    notifier: Arc<StatusNotifier>,
}

impl SuiteOrchestrator {
    pub fn new(
        config: SuiteConfig,
        queue: AdmissionQueue,
        cases: Arc<dyn CaseSource>,
        store: Arc<dyn DurableStore>,
        notifier: Arc<StatusNotifier>,
    ) -> Self {
        Self {
            shared: Arc::new(SuiteShared {
                config,
                queue,
                store,
                suites: Mutex::new(HashMap::new()),
            }),
            cases,
            notifier,
        }
    }

    /// Start a suite run. Returns the suite run id.
    pub fn run_suite(&self, suite_id: &str, submitter_id: &str) -> Result<String, SuiteError> {
        let case_ids = self
            .cases
            .suite_members(suite_id)?
            .ok_or_else(|| SuiteError::NotFound(suite_id.to_string()))?;
        if case_ids.is_empty() {
            return Err(SuiteError::Empty(suite_id.to_string()));
        }

        let suite_run_id = uuid::Uuid::new_v4().to_string();
        let tasks: VecDeque<RunTask> = case_ids
            .iter()
            .map(|case_id| RunTask::new(case_id, submitter_id).for_suite(&suite_run_id))
            .collect();
        let record = SuiteRunRecord::new(
            &suite_run_id,
            suite_id,
            submitter_id,
            tasks
                .iter()
                .map(|task| (task.case_id.clone(), task.id.clone()))
                .collect(),
            Utc::now(),
        );
        self.shared.store.persist_suite_run(&record)?;

        // Listen before the first member can report anything
        let subscription = self
            .notifier
            .subscribe(ObserverFilter::SuiteRun(suite_run_id.clone()));
        self.shared.suites().insert(
            suite_run_id.clone(),
            SuiteEntry {
                record,
                pending: tasks,
            },
        );

        info!(
            suite_run_id = %suite_run_id,
            suite_id,
            members = case_ids.len(),
            "Suite run started"
        );

        if !self.shared.submit_ready(&suite_run_id) {
            let shared = self.shared.clone();
            let id = suite_run_id.clone();
            tokio::spawn(track(shared, id, subscription));
        }

        Ok(suite_run_id)
    }

    /// Cancel a running suite: queued members are withdrawn, running members
    /// are cancelled at their next step boundary.
    pub fn cancel_suite(&self, suite_run_id: &str) -> Result<(), SuiteError> {
        let (submitted, unsubmitted) = {
            let mut suites = self.shared.suites();
            let Some(entry) = suites.get_mut(suite_run_id) else {
                drop(suites);
                return match self.shared.store.get_suite_run(suite_run_id)? {
                    Some(_) => Err(SuiteError::AlreadyFinished(suite_run_id.to_string())),
                    None => Err(SuiteError::NotFound(suite_run_id.to_string())),
                };
            };
            entry.record.request_cancel();

            let submitted: Vec<String> = entry
                .record
                .members
                .iter()
                .filter(|m| m.submitted && !m.status.is_terminal())
                .map(|m| m.run_id.clone())
                .collect();
            let unsubmitted: Vec<String> = entry.pending.drain(..).map(|t| t.id).collect();
            (submitted, unsubmitted)
        };

        info!(
            suite_run_id,
            submitted = submitted.len(),
            unsubmitted = unsubmitted.len(),
            "Cancelling suite run"
        );

        for run_id in &unsubmitted {
            self.shared.apply(
                suite_run_id,
                run_id,
                RunStatus::Cancelled,
                Some("suite cancelled".to_string()),
                Utc::now(),
            );
        }
        for run_id in &submitted {
            if let Err(e) = self.shared.queue.cancel(run_id) {
                debug!(suite_run_id, run_id = %run_id, error = %e, "Member not cancelled");
            }
        }
        Ok(())
    }

    /// Live aggregate, else the stored one.
    pub fn get_suite_run(&self, suite_run_id: &str) -> Result<Option<SuiteRunRecord>, SuiteError> {
        if let Some(entry) = self.shared.suites().get(suite_run_id) {
            return Ok(Some(entry.record.clone()));
        }
        Ok(self.shared.store.get_suite_run(suite_run_id)?)
    }

    pub fn active_suite_runs(&self) -> Vec<SuiteRunRecord> {
        self.shared
            .suites()
            .values()
            .map(|entry| entry.record.clone())
            .collect()
    }
}

async fn track(shared: Arc<SuiteShared>, suite_run_id: String, mut events: StatusSubscription) {
    while shared.is_active(&suite_run_id) {
        let Some(event) = events.recv().await else {
            warn!(suite_run_id = %suite_run_id, "Status stream closed before suite finished");
            return;
        };

        let terminal = event.status.is_terminal();
        if shared.apply(
            &suite_run_id,
            &event.run_id,
            event.status,
            event.error,
            event.at,
        ) {
            break;
        }
        if terminal && shared.submit_ready(&suite_run_id) {
            break;
        }
    }
    debug!(suite_run_id = %suite_run_id, "Suite tracker exited");
}

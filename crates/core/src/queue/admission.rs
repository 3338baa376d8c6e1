//! Admission queue implementation.
//!
//! Tasks wait in a priority-then-FIFO backlog until both the global cap and
//! their submitter's cap have room. Each dispatched task gets its own worker
//! that awaits the run's completion under the task timeout, then frees the
//! slot and pumps the backlog again.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::notifier::{StatusNotifier, StatusUpdate};
use crate::orchestrator::{RunError, RunStatus};

use super::config::QueueConfig;
use super::types::{
    AdmissionError, CancelOutcome, DispatchError, QueueStatus, RunTask, TaskDispatcher,
};

/// Backlog order: highest priority first, then submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct BacklogKey {
    priority: Reverse<i32>,
    seq: u64,
}

struct Pending {
    task: RunTask,
    /// Retried tasks are not eligible before this.
    not_before: Option<Instant>,
}

struct InFlight {
    task: RunTask,
}

#[derive(Default)]
struct QueueState {
    backlog: BTreeMap<BacklogKey, Pending>,
    keys: HashMap<String, BacklogKey>,
    in_flight: HashMap<String, InFlight>,
    per_submitter: HashMap<String, usize>,
    /// In-flight tasks with an accepted cancel.
    cancel_requested: HashSet<String>,
    next_seq: u64,
    shutting_down: bool,
}

impl QueueState {
    fn enqueue(&mut self, task: RunTask, not_before: Option<Instant>) {
        let key = BacklogKey {
            priority: Reverse(task.priority),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.keys.insert(task.id.clone(), key);
        self.backlog.insert(key, Pending { task, not_before });
    }

    fn remove_pending(&mut self, task_id: &str) -> Option<RunTask> {
        let key = self.keys.remove(task_id)?;
        self.backlog.remove(&key).map(|pending| pending.task)
    }

    fn release(&mut self, task_id: &str) {
        self.cancel_requested.remove(task_id);
        if let Some(entry) = self.in_flight.remove(task_id) {
            let submitter = &entry.task.submitter_id;
            if let Some(count) = self.per_submitter.get_mut(submitter) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.per_submitter.remove(submitter);
                }
            }
        }
    }

    /// Move every task that fits the caps from the backlog to in-flight.
    fn take_dispatchable(&mut self, config: &QueueConfig, now: Instant) -> Vec<RunTask> {
        let mut selected = Vec::new();
        let mut planned: HashMap<String, usize> = HashMap::new();

        for (key, pending) in &self.backlog {
            if self.in_flight.len() + selected.len() >= config.max_concurrent {
                break;
            }
            if pending.not_before.is_some_and(|at| at > now) {
                continue;
            }
            let submitter = &pending.task.submitter_id;
            let running = self.per_submitter.get(submitter).copied().unwrap_or(0)
                + planned.get(submitter).copied().unwrap_or(0);
            if running >= config.max_per_submitter {
                // Later tasks from other submitters may still go
                continue;
            }
            *planned.entry(submitter.clone()).or_insert(0) += 1;
            selected.push(*key);
        }

        selected
            .into_iter()
            .filter_map(|key| self.backlog.remove(&key))
            .map(|pending| {
                let task = pending.task;
                self.keys.remove(&task.id);
                *self
                    .per_submitter
                    .entry(task.submitter_id.clone())
                    .or_insert(0) += 1;
                self.in_flight
                    .insert(task.id.clone(), InFlight { task: task.clone() });
                task
            })
            .collect()
    }
}

struct QueueInner {
    config: QueueConfig,
    dispatcher: Arc<dyn TaskDispatcher>,
    notifier: Arc<StatusNotifier>,
    state: Mutex<QueueState>,
    total_submitted: AtomicU64,
    total_dispatched: AtomicU64,
    total_failed: AtomicU64,
}

impl QueueInner {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Dispatch whatever fits. Never blocks.
    fn pump(self: &Arc<Self>) {
        let ready = {
            let mut state = self.state();
            if state.shutting_down {
                return;
            }
            state.take_dispatchable(&self.config, Instant::now())
        };

        for task in ready {
            let wait = (Utc::now() - task.queued_at).num_milliseconds().max(0) as f64 / 1000.0;
            metrics::QUEUE_WAIT.with_label_values(&[]).observe(wait);
            debug!(task_id = %task.id, submitter = %task.submitter_id, "Dispatching task");

            let inner = Arc::clone(self);
            tokio::spawn(async move {
                inner.run_task(task).await;
            });
        }
    }

    async fn run_task(self: Arc<Self>, mut task: RunTask) {
        task.attempts += 1;
        let task_id = task.id.clone();
        let limit = task
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.task_timeout());
        // Session open and execution share one deadline
        let deadline = Instant::now() + limit;

        let started = match tokio::time::timeout_at(deadline, self.dispatcher.start(task.clone()))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Transient(format!(
                "start timed out after {}s",
                limit.as_secs()
            ))),
        };

        match started {
            Ok(completion) => {
                metrics::QUEUE_DISPATCHES.inc();
                self.total_dispatched.fetch_add(1, Ordering::Relaxed);

                // A cancel accepted before the run registered its control
                let late_cancel = self.state().cancel_requested.contains(&task_id);
                if late_cancel {
                    if let Err(e) = self.dispatcher.cancel(&task_id) {
                        debug!(task_id = %task_id, error = %e, "Late cancel not applied");
                    }
                }

                match tokio::time::timeout_at(deadline, completion).await {
                    Ok(Ok(status)) => {
                        debug!(task_id = %task_id, status = %status, "Task finished");
                    }
                    Ok(Err(_)) => {
                        warn!(task_id = %task_id, "Run ended without reporting completion");
                    }
                    Err(_) => {
                        metrics::QUEUE_TIMEOUTS.inc();
                        warn!(
                            task_id = %task_id,
                            timeout_secs = limit.as_secs(),
                            "Task timed out, releasing its slot"
                        );
                        self.dispatcher.abort(
                            &task_id,
                            &format!("timed out after {}s", limit.as_secs()),
                        );
                    }
                }
                self.state().release(&task_id);
            }
            Err(error) => self.dispatch_failed(task, error),
        }

        self.pump();
    }

    /// Settle a task whose start attempt failed: withdraw, retry or reject.
    fn dispatch_failed(self: &Arc<Self>, task: RunTask, error: DispatchError) {
        let task_id = task.id.clone();
        let retry_allowed = task.attempts <= self.config.max_retries;

        let (cancel_requested, requeued, shutting_down) = {
            let mut state = self.state();
            let cancel_requested = state.cancel_requested.contains(&task_id)
                || matches!(error, DispatchError::Cancelled(_));
            state.release(&task_id);
            let requeue = !cancel_requested
                && retry_allowed
                && matches!(error, DispatchError::Transient(_))
                && !state.shutting_down;
            if requeue {
                let delay = self.config.retry_delay();
                state.enqueue(task.clone(), Some(Instant::now() + delay));
            }
            (cancel_requested, requeue, state.shutting_down)
        };

        if cancel_requested {
            info!(task_id = %task_id, error = %error, "Task cancelled while starting");
            self.dispatcher.withdraw(&task, "cancelled before start");
            return;
        }

        match error {
            DispatchError::Transient(reason) => {
                if requeued {
                    metrics::QUEUE_RETRIES.inc();
                    warn!(
                        task_id = %task_id,
                        attempt = task.attempts,
                        error = %reason,
                        "Dispatch failed, will retry"
                    );
                    let inner = Arc::clone(self);
                    let delay = self.config.retry_delay();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        inner.pump();
                    });
                } else if retry_allowed && shutting_down {
                    self.announce_cancelled(&task, "queue shut down");
                } else {
                    metrics::QUEUE_FAILURES
                        .with_label_values(&["retries_exhausted"])
                        .inc();
                    self.total_failed.fetch_add(1, Ordering::Relaxed);
                    warn!(task_id = %task_id, attempts = task.attempts, "Giving up on task");
                    self.dispatcher.reject(
                        &task,
                        &format!("dispatch failed after {} attempts: {}", task.attempts, reason),
                    );
                }
            }
            DispatchError::Rejected(reason) => {
                metrics::QUEUE_FAILURES.with_label_values(&["rejected"]).inc();
                self.total_failed.fetch_add(1, Ordering::Relaxed);
                warn!(task_id = %task_id, error = %reason, "Dispatch rejected");
                self.dispatcher.reject(&task, &reason);
            }
            // Handled above
            DispatchError::Cancelled(_) => {}
        }
    }

    fn announce_cancelled(&self, task: &RunTask, reason: &str) {
        self.notifier.publish_update(
            StatusUpdate::new(&task.id, RunStatus::Cancelled)
                .with_case(&task.case_id)
                .with_suite_run(task.suite_run_id().map(str::to_string))
                .with_error(Some(reason.to_string())),
        );
    }
}

/// Admission-controlled run queue.
#[derive(Clone)]
pub struct AdmissionQueue {
    inner: Arc<QueueInner>,
}

impl AdmissionQueue {
    pub fn new(
        config: QueueConfig,
        dispatcher: Arc<dyn TaskDispatcher>,
        notifier: Arc<StatusNotifier>,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                config,
                dispatcher,
                notifier,
                state: Mutex::new(QueueState::default()),
                total_submitted: AtomicU64::new(0),
                total_dispatched: AtomicU64::new(0),
                total_failed: AtomicU64::new(0),
            }),
        }
    }

    /// Admit a task. Returns the task id, which is also the run id.
    pub fn submit(&self, task: RunTask) -> Result<String, AdmissionError> {
        let result = self.admit(task);
        let label = match &result {
            Ok(_) => "accepted",
            Err(AdmissionError::QueueFull { .. }) => "queue_full",
            Err(AdmissionError::InvalidTask(_)) => "invalid",
            Err(AdmissionError::ShuttingDown) => "shutting_down",
        };
        metrics::QUEUE_SUBMISSIONS.with_label_values(&[label]).inc();
        result
    }

    fn admit(&self, task: RunTask) -> Result<String, AdmissionError> {
        if task.id.trim().is_empty() {
            return Err(AdmissionError::InvalidTask("task id is empty".into()));
        }
        if task.case_id.trim().is_empty() {
            return Err(AdmissionError::InvalidTask("case id is empty".into()));
        }
        if task.submitter_id.trim().is_empty() {
            return Err(AdmissionError::InvalidTask("submitter id is empty".into()));
        }

        {
            let mut state = self.inner.state();
            if state.shutting_down {
                return Err(AdmissionError::ShuttingDown);
            }
            if state.keys.contains_key(&task.id) || state.in_flight.contains_key(&task.id) {
                return Err(AdmissionError::InvalidTask(format!(
                    "task {} already admitted",
                    task.id
                )));
            }
            if state.backlog.len() >= self.inner.config.max_backlog {
                return Err(AdmissionError::QueueFull {
                    capacity: self.inner.config.max_backlog,
                });
            }
            state.enqueue(task.clone(), None);
        }

        self.inner.total_submitted.fetch_add(1, Ordering::Relaxed);
        info!(
            task_id = %task.id,
            case_id = %task.case_id,
            submitter = %task.submitter_id,
            "Task admitted"
        );
        self.inner.notifier.publish_update(
            StatusUpdate::new(&task.id, RunStatus::Queued)
                .with_case(&task.case_id)
                .with_suite_run(task.suite_run_id().map(str::to_string)),
        );

        self.inner.pump();
        Ok(task.id)
    }

    /// Cancel a task.
    ///
    /// Backlog tasks are removed without ever dispatching. Dispatched tasks
    /// are handed to the orchestrator.
    pub fn cancel(&self, task_id: &str) -> Result<CancelOutcome, RunError> {
        let (removed, in_flight) = {
            let mut state = self.inner.state();
            let removed = state.remove_pending(task_id);
            let in_flight = state.in_flight.contains_key(task_id);
            if in_flight {
                state.cancel_requested.insert(task_id.to_string());
            }
            (removed, in_flight)
        };

        if let Some(task) = removed {
            info!(task_id, "Removed task from backlog");
            self.inner.announce_cancelled(&task, "cancelled before dispatch");
            return Ok(CancelOutcome::Removed);
        }
        if in_flight {
            return match self.inner.dispatcher.cancel(task_id) {
                // Still starting: the queue applies the cancel once start returns
                Ok(()) | Err(RunError::NotFound(_)) => Ok(CancelOutcome::Delegated),
                Err(e) => {
                    self.inner.state().cancel_requested.remove(task_id);
                    Err(e)
                }
            };
        }
        Ok(CancelOutcome::NotFound)
    }

    /// A task still waiting in the backlog.
    pub fn pending_task(&self, task_id: &str) -> Option<RunTask> {
        let state = self.inner.state();
        let key = state.keys.get(task_id)?;
        state.backlog.get(key).map(|pending| pending.task.clone())
    }

    /// A task the queue still tracks, waiting or in flight.
    pub fn task(&self, task_id: &str) -> Option<RunTask> {
        let state = self.inner.state();
        if let Some(entry) = state.in_flight.get(task_id) {
            return Some(entry.task.clone());
        }
        let key = state.keys.get(task_id)?;
        state.backlog.get(key).map(|pending| pending.task.clone())
    }

    pub fn is_in_flight(&self, task_id: &str) -> bool {
        self.inner.state().in_flight.contains_key(task_id)
    }

    /// Backlog tasks in dispatch order.
    pub fn backlog(&self) -> Vec<RunTask> {
        self.inner
            .state()
            .backlog
            .values()
            .map(|pending| pending.task.clone())
            .collect()
    }

    pub fn status(&self) -> QueueStatus {
        let config = &self.inner.config;
        let state = self.inner.state();
        QueueStatus {
            max_concurrent: config.max_concurrent,
            max_per_submitter: config.max_per_submitter,
            max_backlog: config.max_backlog,
            in_flight: state.in_flight.len(),
            backlog: state.backlog.len(),
            per_submitter: state.per_submitter.clone(),
            total_submitted: self.inner.total_submitted.load(Ordering::Relaxed),
            total_dispatched: self.inner.total_dispatched.load(Ordering::Relaxed),
            total_failed: self.inner.total_failed.load(Ordering::Relaxed),
            shutting_down: state.shutting_down,
        }
    }

    /// Refuse new work and cancel everything still in the backlog.
    ///
    /// In-flight runs are left to the orchestrator.
    pub fn shutdown(&self) {
        let drained: Vec<RunTask> = {
            let mut state = self.inner.state();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
            state.keys.clear();
            std::mem::take(&mut state.backlog)
                .into_values()
                .map(|pending| pending.task)
                .collect()
        };

        info!(cancelled = drained.len(), "Admission queue shutting down");
        for task in &drained {
            self.inner.announce_cancelled(task, "queue shut down");
        }
    }
}

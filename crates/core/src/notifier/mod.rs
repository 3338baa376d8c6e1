//! Status notifier.
//!
//! Pushes run state transitions to observers. Each observer owns an unbounded
//! channel, so a slow observer never loses events and never blocks a publisher.
//! Observers that went away are pruned on the next publish.
//!
//! Delivery order per run is the publish order: every publish happens under
//! one lock, and the per-run sequence number is stamped under that same lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::metrics;
use crate::orchestrator::RunStatus;

/// A run state change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusEvent {
    pub run_id: String,
    /// Monotonic per run, starting at 1.
    pub sequence: u64,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suite_run_id: Option<String>,
    pub at: DateTime<Utc>,
}

/// What a publisher knows about a transition.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub run_id: String,
    pub status: RunStatus,
    pub error: Option<String>,
    pub case_id: Option<String>,
    pub suite_run_id: Option<String>,
}

impl StatusUpdate {
    pub fn new(run_id: impl Into<String>, status: RunStatus) -> Self {
        Self {
            run_id: run_id.into(),
            status,
            error: None,
            case_id: None,
            suite_run_id: None,
        }
    }

    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }

    pub fn with_case(mut self, case_id: impl Into<String>) -> Self {
        self.case_id = Some(case_id.into());
        self
    }

    pub fn with_suite_run(mut self, suite_run_id: Option<String>) -> Self {
        self.suite_run_id = suite_run_id;
        self
    }
}

/// Which events an observer wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverFilter {
    All,
    Run(String),
    SuiteRun(String),
}

impl ObserverFilter {
    fn matches(&self, event: &StatusEvent) -> bool {
        match self {
            ObserverFilter::All => true,
            ObserverFilter::Run(id) => event.run_id == *id,
            ObserverFilter::SuiteRun(id) => event.suite_run_id.as_deref() == Some(id.as_str()),
        }
    }
}

struct Observer {
    id: u64,
    filter: ObserverFilter,
    tx: mpsc::UnboundedSender<StatusEvent>,
}

#[derive(Default)]
struct NotifierState {
    observers: Vec<Observer>,
    sequences: HashMap<String, u64>,
}

/// Fan-out of run status changes.
pub struct StatusNotifier {
    state: Mutex<NotifierState>,
    next_id: AtomicU64,
}

impl StatusNotifier {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NotifierState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register an observer. Events published after this call are delivered.
    pub fn subscribe(&self, filter: ObserverFilter) -> StatusSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        match self.state.lock() {
            Ok(mut state) => state.observers.push(Observer { id, filter, tx }),
            Err(_) => warn!("Status notifier lock poisoned, observer not registered"),
        }

        debug!(observer_id = id, "Status observer subscribed");
        StatusSubscription { id, rx }
    }

    /// Publish a bare transition.
    pub fn publish(&self, run_id: &str, status: RunStatus, error: Option<String>) -> StatusEvent {
        self.publish_update(StatusUpdate::new(run_id, status).with_error(error))
    }

    /// Publish a transition and return the event as delivered.
    pub fn publish_update(&self, update: StatusUpdate) -> StatusEvent {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        let sequence = {
            let seq = state.sequences.entry(update.run_id.clone()).or_insert(0);
            *seq += 1;
            *seq
        };
        if update.status.is_terminal() {
            // Terminal is the last event for a run
            state.sequences.remove(&update.run_id);
        }

        let event = StatusEvent {
            run_id: update.run_id,
            sequence,
            status: update.status,
            error: update.error,
            case_id: update.case_id,
            suite_run_id: update.suite_run_id,
            at: Utc::now(),
        };

        let before = state.observers.len();
        state.observers.retain(|observer| {
            if observer.tx.is_closed() {
                return false;
            }
            if !observer.filter.matches(&event) {
                return true;
            }
            observer.tx.send(event.clone()).is_ok()
        });
        let pruned = before - state.observers.len();
        if pruned > 0 {
            debug!(pruned, "Pruned disconnected status observers");
        }

        metrics::STATUS_EVENTS_PUBLISHED
            .with_label_values(&[event.status.as_str()])
            .inc();

        debug!(
            run_id = %event.run_id,
            status = %event.status,
            sequence = event.sequence,
            "Published status event"
        );
        event
    }

    /// Number of registered observers (including not yet pruned ones).
    pub fn observer_count(&self) -> usize {
        self.state.lock().map(|s| s.observers.len()).unwrap_or(0)
    }
}

impl Default for StatusNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of one observer registration.
///
/// Dropping it disconnects the observer; the notifier forgets it on the next
/// publish.
pub struct StatusSubscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<StatusEvent>,
}

impl StatusSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<StatusEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StatusEvent> {
        self.rx.try_recv().ok()
    }

    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_per_run() {
        let notifier = StatusNotifier::new();
        let mut sub = notifier.subscribe(ObserverFilter::All);

        notifier.publish("a", RunStatus::Queued, None);
        notifier.publish("b", RunStatus::Queued, None);
        notifier.publish("a", RunStatus::Running, None);

        let events: Vec<_> = std::iter::from_fn(|| sub.try_recv()).collect();
        let seqs: Vec<_> = events
            .iter()
            .map(|e| (e.run_id.as_str(), e.sequence))
            .collect();
        assert_eq!(seqs, vec![("a", 1), ("b", 1), ("a", 2)]);
    }

    #[test]
    fn test_run_filter() {
        let notifier = StatusNotifier::new();
        let mut sub = notifier.subscribe(ObserverFilter::Run("a".into()));

        notifier.publish("b", RunStatus::Running, None);
        notifier.publish("a", RunStatus::Running, None);

        let event = sub.try_recv().unwrap();
        assert_eq!(event.run_id, "a");
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_suite_run_filter() {
        let notifier = StatusNotifier::new();
        let mut sub = notifier.subscribe(ObserverFilter::SuiteRun("s1".into()));

        notifier.publish_update(
            StatusUpdate::new("r1", RunStatus::Completed).with_suite_run(Some("s1".into())),
        );
        notifier.publish("r2", RunStatus::Completed, None);

        assert_eq!(sub.try_recv().unwrap().run_id, "r1");
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_dropped_observer_pruned_on_publish() {
        let notifier = StatusNotifier::new();
        let keep = notifier.subscribe(ObserverFilter::All);
        let gone = notifier.subscribe(ObserverFilter::All);
        assert_eq!(notifier.observer_count(), 2);

        drop(gone);
        notifier.publish("a", RunStatus::Running, None);
        assert_eq!(notifier.observer_count(), 1);
        drop(keep);
    }

    #[test]
    fn test_error_detail_delivered() {
        let notifier = StatusNotifier::new();
        let mut sub = notifier.subscribe(ObserverFilter::All);

        notifier.publish("a", RunStatus::Failed, Some("session lost".into()));
        let event = sub.try_recv().unwrap();
        assert_eq!(event.status, RunStatus::Failed);
        assert_eq!(event.error.as_deref(), Some("session lost"));
    }

    #[tokio::test]
    async fn test_slow_observer_receives_everything_in_order() {
        let notifier = StatusNotifier::new();
        let mut sub = notifier.subscribe(ObserverFilter::Run("a".into()));

        notifier.publish("a", RunStatus::Queued, None);
        notifier.publish("a", RunStatus::Running, None);
        notifier.publish("a", RunStatus::Completed, None);

        let mut statuses = Vec::new();
        for _ in 0..3 {
            statuses.push(sub.recv().await.unwrap().status);
        }
        assert_eq!(
            statuses,
            vec![RunStatus::Queued, RunStatus::Running, RunStatus::Completed]
        );
    }
}

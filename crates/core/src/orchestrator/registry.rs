//! Live run registry.
//!
//! Each run's record is owned by the task driving it; the registry only
//! holds published snapshots plus the run's control flags. A run id can be
//! claimed by one driver at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use super::types::RunRecord;

/// Why a run should stop at its next step boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopSignal {
    Cancel,
    Abort(String),
}

/// Cooperative stop flags for one run.
#[derive(Debug, Default)]
pub struct RunControl {
    cancelled: AtomicBool,
    abort: Mutex<Option<String>>,
}

impl RunControl {
    /// Request cancellation. Returns false if it was already requested.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Request the run be failed with `reason`. The first reason wins.
    pub fn abort(&self, reason: &str) {
        let mut slot = self
            .abort
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none() {
            *slot = Some(reason.to_string());
        }
    }

    /// Pending stop request, abort first.
    pub fn check(&self) -> Option<StopSignal> {
        let abort = self
            .abort
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        match abort {
            Some(reason) => Some(StopSignal::Abort(reason)),
            None if self.is_cancelled() => Some(StopSignal::Cancel),
            None => None,
        }
    }
}

struct RunSlot {
    control: Arc<RunControl>,
    record: Option<RunRecord>,
    finished_at: Option<Instant>,
}

/// Run id to live state.
#[derive(Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<String, RunSlot>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<String, RunSlot>> {
        self.runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim a run id for driving. `None` if someone already holds it.
    pub fn claim(&self, run_id: &str) -> Option<Arc<RunControl>> {
        let mut runs = self.runs();
        if runs.contains_key(run_id) {
            return None;
        }
        let control = Arc::new(RunControl::default());
        runs.insert(
            run_id.to_string(),
            RunSlot {
                control: control.clone(),
                record: None,
                finished_at: None,
            },
        );
        Some(control)
    }

    /// Drop a claim that never produced a finished run.
    pub fn release(&self, run_id: &str) {
        let mut runs = self.runs();
        if runs.get(run_id).is_some_and(|slot| slot.finished_at.is_none()) {
            runs.remove(run_id);
        }
    }

    /// Claim a run id and get a guard that releases it on drop.
    pub fn claim_guarded(self: &Arc<Self>, run_id: &str) -> Option<ClaimGuard> {
        let control = self.claim(run_id)?;
        Some(ClaimGuard {
            registry: Arc::clone(self),
            run_id: run_id.to_string(),
            control,
            armed: true,
        })
    }

    /// Publish a snapshot of a live run.
    pub fn update(&self, record: &RunRecord) {
        if let Some(slot) = self.runs().get_mut(&record.id) {
            if slot.finished_at.is_none() {
                slot.record = Some(record.clone());
            }
        }
    }

    /// Store the final record; it stays until swept.
    pub fn finish(&self, record: RunRecord) {
        let mut runs = self.runs();
        let slot = runs.entry(record.id.clone()).or_insert_with(|| RunSlot {
            control: Arc::new(RunControl::default()),
            record: None,
            finished_at: None,
        });
        slot.record = Some(record);
        slot.finished_at = Some(Instant::now());
    }

    pub fn snapshot(&self, run_id: &str) -> Option<RunRecord> {
        self.runs().get(run_id).and_then(|slot| slot.record.clone())
    }

    /// Control flags of a run that has not finished.
    pub fn control(&self, run_id: &str) -> Option<Arc<RunControl>> {
        self.runs()
            .get(run_id)
            .filter(|slot| slot.finished_at.is_none())
            .map(|slot| slot.control.clone())
    }

    /// `Some(true)` finished, `Some(false)` live, `None` unknown.
    pub fn is_finished(&self, run_id: &str) -> Option<bool> {
        self.runs()
            .get(run_id)
            .map(|slot| slot.finished_at.is_some())
    }

    /// Snapshots of every run not yet finished.
    pub fn active(&self) -> Vec<RunRecord> {
        self.runs()
            .values()
            .filter(|slot| slot.finished_at.is_none())
            .filter_map(|slot| slot.record.clone())
            .collect()
    }

    /// Controls of every run not yet finished.
    pub fn active_controls(&self) -> Vec<Arc<RunControl>> {
        self.runs()
            .values()
            .filter(|slot| slot.finished_at.is_none())
            .map(|slot| slot.control.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.runs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict finished runs older than `retention`. Returns how many went.
    pub fn sweep(&self, retention: Duration, now: Instant) -> usize {
        let mut runs = self.runs();
        let before = runs.len();
        runs.retain(|_, slot| match slot.finished_at {
            Some(at) => now.saturating_duration_since(at) < retention,
            None => true,
        });
        before - runs.len()
    }
}

/// A claim held while a run is being started.
///
/// Dropping it (early return, or the start future being dropped on a
/// timeout) releases the run id unless `keep` was called.
pub struct ClaimGuard {
    registry: Arc<RunRegistry>,
    run_id: String,
    control: Arc<RunControl>,
    armed: bool,
}

impl ClaimGuard {
    pub fn control(&self) -> &Arc<RunControl> {
        &self.control
    }

    /// The run started; its worker now owns the claim.
    pub fn keep(mut self) -> Arc<RunControl> {
        self.armed = false;
        self.control.clone()
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if self.armed {
            self.registry.release(&self.run_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(id: &str) -> RunRecord {
        RunRecord::new(id, "case-1", "alice", Utc::now())
    }

    #[test]
    fn test_single_claim_per_run() {
        let registry = RunRegistry::new();
        assert!(registry.claim("run-1").is_some());
        assert!(registry.claim("run-1").is_none());

        registry.release("run-1");
        assert!(registry.claim("run-1").is_some());
    }

    #[test]
    fn test_claim_guard_releases_unless_kept() {
        let registry = Arc::new(RunRegistry::new());

        let guard = registry.claim_guarded("run-1").unwrap();
        assert!(registry.claim_guarded("run-1").is_none());
        drop(guard);
        assert!(registry.control("run-1").is_none());

        let guard = registry.claim_guarded("run-1").unwrap();
        let control = guard.keep();
        assert!(!control.is_cancelled());
        assert!(registry.control("run-1").is_some());
    }

    #[test]
    fn test_release_keeps_finished_runs() {
        let registry = RunRegistry::new();
        registry.claim("run-1");
        registry.finish(record("run-1"));
        registry.release("run-1");
        assert!(registry.snapshot("run-1").is_some());
    }

    #[test]
    fn test_snapshot_frozen_after_finish() {
        let registry = RunRegistry::new();
        registry.claim("run-1");
        let mut live = record("run-1");
        registry.update(&live);
        registry.finish(live.clone());

        live.attempts = 99;
        registry.update(&live);
        assert_eq!(registry.snapshot("run-1").unwrap().attempts, 0);
        assert!(registry.control("run-1").is_none());
        assert_eq!(registry.is_finished("run-1"), Some(true));
    }

    #[test]
    fn test_control_flags() {
        let control = RunControl::default();
        assert_eq!(control.check(), None);
        assert!(control.cancel());
        assert!(!control.cancel());
        assert_eq!(control.check(), Some(StopSignal::Cancel));

        control.abort("timed out");
        control.abort("second reason");
        assert_eq!(control.check(), Some(StopSignal::Abort("timed out".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_only_expired_finished_runs() {
        let registry = RunRegistry::new();
        registry.claim("live");
        registry.claim("done");
        registry.finish(record("done"));

        let retention = Duration::from_secs(60);
        assert_eq!(registry.sweep(retention, Instant::now()), 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(registry.sweep(retention, Instant::now()), 1);
        assert!(registry.snapshot("done").is_none());
        assert_eq!(registry.len(), 1);
    }
}

//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Admission queue (submissions, dispatches, retries, timeouts)
//! - Run orchestrator (runs, steps)
//! - Frame broadcaster (captures, pauses, dropped viewers)
//! - Suites and status notifications

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Admission Queue
// =============================================================================

/// Submissions by result.
pub static QUEUE_SUBMISSIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("testpilot_queue_submissions_total", "Total run submissions"),
        &["result"], // "accepted", "queue_full", "invalid", "shutting_down"
    )
    .unwrap()
});

/// Tasks handed to the orchestrator.
pub static QUEUE_DISPATCHES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "testpilot_queue_dispatches_total",
        "Total tasks dispatched to the orchestrator",
    )
    .unwrap()
});

/// Transient dispatch failures that were re-queued.
pub static QUEUE_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "testpilot_queue_retries_total",
        "Total dispatch retries after transient failures",
    )
    .unwrap()
});

/// Tasks that gave up (retries exhausted or rejected).
pub static QUEUE_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "testpilot_queue_failures_total",
            "Tasks that failed before starting",
        ),
        &["reason"], // "retries_exhausted", "rejected"
    )
    .unwrap()
});

/// Dispatched tasks that did not report completion in time.
pub static QUEUE_TIMEOUTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "testpilot_queue_timeouts_total",
        "Total dispatched tasks that timed out",
    )
    .unwrap()
});

/// Time spent in the backlog before dispatch.
pub static QUEUE_WAIT: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "testpilot_queue_wait_seconds",
            "Time between submission and dispatch",
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
        &[],
    )
    .unwrap()
});

// =============================================================================
// Run Orchestrator
// =============================================================================

pub static RUNS_STARTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("testpilot_runs_started_total", "Total runs started").unwrap()
});

/// Finished runs by terminal status.
pub static RUNS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("testpilot_runs_finished_total", "Total runs finished"),
        &["status"], // "completed", "failed", "cancelled"
    )
    .unwrap()
});

/// Run duration in seconds.
pub static RUN_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("testpilot_run_duration_seconds", "Duration of runs")
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 900.0]),
        &["status"],
    )
    .unwrap()
});

/// Step outcomes.
pub static STEP_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("testpilot_steps_total", "Total steps recorded"),
        &["outcome"], // "passed", "failed", "blocked"
    )
    .unwrap()
});

/// Driver action duration by action kind.
pub static STEP_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "testpilot_step_duration_seconds",
            "Duration of driver actions",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["action"],
    )
    .unwrap()
});

// =============================================================================
// Frame Broadcaster
// =============================================================================

/// Capture ticks by result.
pub static FRAME_CAPTURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("testpilot_frame_captures_total", "Total frame capture ticks"),
        &["result"], // "success", "cached", "placeholder", "skipped"
    )
    .unwrap()
});

/// Transcode duration in seconds.
pub static FRAME_TRANSCODE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "testpilot_frame_transcode_seconds",
            "Duration of frame transcoding",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25]),
        &[],
    )
    .unwrap()
});

/// Broadcasts paused by the circuit breaker.
pub static STREAM_PAUSES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "testpilot_stream_pauses_total",
        "Total broadcasts paused after repeated capture failures",
    )
    .unwrap()
});

/// Viewers removed from a broadcast.
pub static SUBSCRIBERS_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "testpilot_stream_subscribers_dropped_total",
            "Total stream viewers removed",
        ),
        &["reason"], // "closed", "stalled", "unsubscribed", "stopped"
    )
    .unwrap()
});

// =============================================================================
// Suites & notifications
// =============================================================================

pub static SUITE_RUNS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("testpilot_suite_runs_finished_total", "Total suite runs finished"),
        &["status"],
    )
    .unwrap()
});

pub static STATUS_EVENTS_PUBLISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "testpilot_status_events_total",
            "Total status events published",
        ),
        &["status"],
    )
    .unwrap()
});

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Queue
        Box::new(QUEUE_SUBMISSIONS.clone()),
        Box::new(QUEUE_DISPATCHES.clone()),
        Box::new(QUEUE_RETRIES.clone()),
        Box::new(QUEUE_FAILURES.clone()),
        Box::new(QUEUE_TIMEOUTS.clone()),
        Box::new(QUEUE_WAIT.clone()),
        // Runs
        Box::new(RUNS_STARTED.clone()),
        Box::new(RUNS_FINISHED.clone()),
        Box::new(RUN_DURATION.clone()),
        Box::new(STEP_OUTCOMES.clone()),
        Box::new(STEP_DURATION.clone()),
        // Streaming
        Box::new(FRAME_CAPTURES.clone()),
        Box::new(FRAME_TRANSCODE_DURATION.clone()),
        Box::new(STREAM_PAUSES.clone()),
        Box::new(SUBSCRIBERS_DROPPED.clone()),
        // Suites & notifications
        Box::new(SUITE_RUNS_FINISHED.clone()),
        Box::new(STATUS_EVENTS_PUBLISHED.clone()),
    ]
}

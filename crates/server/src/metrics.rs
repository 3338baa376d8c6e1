//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the TestPilot server:
//! - HTTP request metrics (latency, counts, errors)
//! - WebSocket and frame stream connections
//! - Queue and run gauges (collected at scrape time)

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

use crate::state::AppState;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "testpilot_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("testpilot_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "testpilot_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

/// Requests answered with one of the engine result codes.
pub static API_RESULT_CODES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("testpilot_api_result_codes_total", "API result codes returned"),
        &["code"],
    )
    .unwrap()
});

// =============================================================================
// WebSocket / Stream Metrics
// =============================================================================

/// Active WebSocket connections.
pub static WS_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "testpilot_ws_connections_active",
        "Number of active WebSocket connections",
    )
    .unwrap()
});

/// Total WebSocket connections (cumulative).
pub static WS_CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "testpilot_ws_connections_total",
        "Total WebSocket connections since startup",
    )
    .unwrap()
});

/// WebSocket messages sent by type.
pub static WS_MESSAGES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("testpilot_ws_messages_sent_total", "WebSocket messages sent"),
        &["type"],
    )
    .unwrap()
});

/// Frame stream viewers (collected dynamically).
pub static STREAM_VIEWERS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "testpilot_stream_viewers_active",
        "Number of connected frame stream viewers",
    )
    .unwrap()
});

/// Runs being broadcast (collected dynamically).
pub static STREAMS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("testpilot_streams_active", "Number of active frame broadcasts").unwrap()
});

// =============================================================================
// Queue / Run Metrics (collected dynamically)
// =============================================================================

/// Tasks waiting in the admission backlog.
pub static QUEUE_BACKLOG: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("testpilot_queue_backlog", "Tasks waiting in the backlog").unwrap()
});

/// Tasks dispatched and not yet finished.
pub static QUEUE_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("testpilot_queue_in_flight", "Tasks currently dispatched").unwrap()
});

/// Runs currently executing.
pub static RUNS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("testpilot_runs_active", "Runs currently executing").unwrap()
});

/// Suite runs not yet finished.
pub static SUITE_RUNS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("testpilot_suite_runs_active", "Suite runs in progress").unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();
    registry
        .register(Box::new(API_RESULT_CODES.clone()))
        .unwrap();

    // WebSocket / streams
    registry
        .register(Box::new(WS_CONNECTIONS_ACTIVE.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_CONNECTIONS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_MESSAGES_SENT.clone()))
        .unwrap();
    registry
        .register(Box::new(STREAM_VIEWERS_ACTIVE.clone()))
        .unwrap();
    registry.register(Box::new(STREAMS_ACTIVE.clone())).unwrap();

    // Queue / runs
    registry.register(Box::new(QUEUE_BACKLOG.clone())).unwrap();
    registry.register(Box::new(QUEUE_IN_FLIGHT.clone())).unwrap();
    registry.register(Box::new(RUNS_ACTIVE.clone())).unwrap();
    registry
        .register(Box::new(SUITE_RUNS_ACTIVE.clone()))
        .unwrap();

    // Core metrics (queue, orchestrator, broadcaster, suites)
    for metric in testpilot_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so gauges reflect the engine right now.
pub fn collect_dynamic_metrics(state: &AppState) {
    let engine = state.engine();

    let queue = engine.queue_status();
    QUEUE_BACKLOG.set(queue.backlog as i64);
    QUEUE_IN_FLIGHT.set(queue.in_flight as i64);

    RUNS_ACTIVE.set(engine.active_runs().len() as i64);
    SUITE_RUNS_ACTIVE.set(engine.active_suite_runs().len() as i64);

    let broadcaster = engine.broadcaster();
    STREAMS_ACTIVE.set(broadcaster.active_streams().len() as i64);
    STREAM_VIEWERS_ACTIVE.set(broadcaster.viewer_count() as i64);
}

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    static UUID: Lazy<regex_lite::Regex> = Lazy::new(|| {
        regex_lite::Regex::new(
            r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
        )
        .unwrap()
    });
    static NUMERIC: Lazy<regex_lite::Regex> =
        Lazy::new(|| regex_lite::Regex::new(r"/\d+(/|$)").unwrap());

    let result = UUID.replace_all(path, "{id}");
    let result = NUMERIC.replace_all(&result, "/{id}$1");
    result.to_string()
}

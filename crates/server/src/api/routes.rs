use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{handlers, middleware::metrics_middleware, queue, runs, stream, suites, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Runs
        .route("/runs", post(runs::submit_run).get(runs::list_runs))
        .route("/runs/active", get(runs::active_runs))
        .route("/runs/{id}", get(runs::get_run).delete(runs::cancel_run))
        // Live frames
        .route("/runs/{id}/stream", get(stream::open_stream))
        .route("/runs/{id}/stream/token", post(stream::issue_token))
        .route("/runs/{id}/stream/stats", get(stream::get_stats))
        // Suites
        .route("/suites/{id}/runs", post(suites::submit_suite))
        .route("/suite-runs/active", get(suites::active_suite_runs))
        .route(
            "/suite-runs/{id}",
            get(suites::get_suite_run).delete(suites::cancel_suite_run),
        )
        // Queue
        .route("/queue", get(queue::get_status))
        // Status events
        .route("/ws", get(ws::ws_handler))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

//! Run API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use testpilot_core::{
    orchestrator::{RunRecord, RunStatus},
    queue::AdmissionError,
    store::RunFilter,
    EngineError, ResultCode,
};

use super::error::{ApiError, ApiResult};
use super::middleware::Submitter;
use crate::state::AppState;

/// Maximum allowed limit for run queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for run queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for submitting a run
#[derive(Debug, Deserialize)]
pub struct SubmitRunBody {
    pub case_id: String,
    /// Higher runs first among waiting tasks
    pub priority: Option<i32>,
}

/// Query parameters for listing runs
#[derive(Debug, Deserialize)]
pub struct ListRunsParams {
    pub case_id: Option<String>,
    pub suite_run_id: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Response for accepted submit/cancel requests
#[derive(Debug, Serialize)]
pub struct RunAcceptedResponse {
    pub code: ResultCode,
    pub run_id: String,
}

/// Response for listing runs
#[derive(Debug, Serialize)]
pub struct ListRunsResponse {
    pub runs: Vec<RunRecord>,
    pub limit: i64,
    pub offset: i64,
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a run of one test case
pub async fn submit_run(
    State(state): State<Arc<AppState>>,
    Submitter(submitter): Submitter,
    Json(body): Json<SubmitRunBody>,
) -> ApiResult<(StatusCode, Json<RunAcceptedResponse>)> {
    let run_id = state
        .engine()
        .submit_run(&body.case_id, &submitter, body.priority.unwrap_or(0))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(RunAcceptedResponse {
            code: ResultCode::Accepted,
            run_id,
        }),
    ))
}

/// Get a run: live, queued or historical
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<RunRecord>> {
    Ok(Json(state.engine().get_run(&id)?))
}

/// List finished runs with optional filters
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListRunsParams>,
) -> ApiResult<Json<ListRunsResponse>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = RunFilter::new().with_limit(limit).with_offset(offset);
    if let Some(case_id) = params.case_id {
        filter = filter.with_case(case_id);
    }
    if let Some(suite_run_id) = params.suite_run_id {
        filter = filter.with_suite_run(suite_run_id);
    }
    if let Some(status) = params.status {
        let status: RunStatus = status.parse().map_err(|e: String| {
            ApiError(EngineError::Admission(AdmissionError::InvalidTask(e)))
        })?;
        filter = filter.with_status(status);
    }

    Ok(Json(ListRunsResponse {
        runs: state.engine().list_runs(&filter)?,
        limit,
        offset,
    }))
}

/// Runs currently executing
pub async fn active_runs(State(state): State<Arc<AppState>>) -> Json<Vec<RunRecord>> {
    Json(state.engine().active_runs())
}

/// Cancel a run (DELETE endpoint)
pub async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<RunAcceptedResponse>)> {
    let code = state.engine().cancel_run(&id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(RunAcceptedResponse { code, run_id: id }),
    ))
}

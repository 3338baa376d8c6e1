//! Suite API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use testpilot_core::{suite::SuiteRunRecord, ResultCode};

use super::error::ApiResult;
use super::middleware::Submitter;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SuiteAcceptedResponse {
    pub code: ResultCode,
    pub suite_run_id: String,
}

/// Start a run of every case in a suite
pub async fn submit_suite(
    State(state): State<Arc<AppState>>,
    Submitter(submitter): Submitter,
    Path(suite_id): Path<String>,
) -> ApiResult<(StatusCode, Json<SuiteAcceptedResponse>)> {
    let suite_run_id = state.engine().submit_suite(&suite_id, &submitter)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SuiteAcceptedResponse {
            code: ResultCode::Accepted,
            suite_run_id,
        }),
    ))
}

pub async fn get_suite_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<SuiteRunRecord>> {
    Ok(Json(state.engine().get_suite_run(&id)?))
}

pub async fn active_suite_runs(State(state): State<Arc<AppState>>) -> Json<Vec<SuiteRunRecord>> {
    Json(state.engine().active_suite_runs())
}

/// Cancel a suite run (DELETE endpoint)
pub async fn cancel_suite_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<SuiteAcceptedResponse>)> {
    let code = state.engine().cancel_suite(&id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SuiteAcceptedResponse {
            code,
            suite_run_id: id,
        }),
    ))
}

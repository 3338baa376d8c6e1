//! Live frame stream endpoints.
//!
//! The stream itself is a `multipart/x-mixed-replace` body: one JPEG part
//! per frame, each with its own `Content-Length`. Browsers render it
//! directly in an `<img>` tag. Access needs a token minted for the run.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use testpilot_core::{
    stream::{codec, StreamStats, StreamToken},
    EngineError,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use super::error::{ApiError, ApiResult};
use super::middleware::Submitter;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub token: Option<String>,
}

/// Mint a stream token for a run that has not finished.
pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<StreamToken>> {
    Ok(Json(state.engine().issue_stream_token(&run_id)?))
}

/// Open the multipart frame stream.
pub async fn open_stream(
    State(state): State<Arc<AppState>>,
    Submitter(viewer): Submitter,
    Path(run_id): Path<String>,
    Query(params): Query<StreamParams>,
) -> ApiResult<Response> {
    let subscription = state
        .engine()
        .open_stream(&run_id, params.token.as_deref(), &viewer)?;
    info!(
        run_id = %run_id,
        viewer = %subscription.viewer,
        subscriber_id = subscription.id,
        "Frame stream opened"
    );

    let boundary = state.config().stream.boundary.clone();
    let content_type = codec::content_type(&boundary);
    let parts = ReceiverStream::new(subscription.into_receiver())
        .map(move |frame| Ok::<_, Infallible>(codec::encode_part(&boundary, &frame)));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-cache, no-store".to_string()),
        ],
        Body::from_stream(parts),
    )
        .into_response())
}

/// Capture and fan-out statistics for a run's broadcast.
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<StreamStats>> {
    state
        .engine()
        .stream_stats(&run_id)
        .map(Json)
        .ok_or_else(|| ApiError(EngineError::NotFound(format!("stream for run {}", run_id))))
}

use axum::{extract::State, Json};
use std::sync::Arc;
use testpilot_core::queue::QueueStatus;

use crate::state::AppState;

/// Admission queue occupancy
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<QueueStatus> {
    Json(state.engine().queue_status())
}

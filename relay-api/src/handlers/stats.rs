//! `/v1/stats`: a coarse operational snapshot (spec §6).

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use relay_common::model::TaskStatus;
use serde::Serialize;

use crate::handlers::notifications::ErrorResponse;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct TaskStats {
    pending: i64,
    processing: i64,
    success: i64,
    failed: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    queue_size: usize,
    task_stats: TaskStats,
    timestamp: DateTime<Utc>,
}

pub async fn get_stats(
    State(state): State<AppState>,
) -> Result<Json<StatsResponse>, (StatusCode, Json<ErrorResponse>)> {
    let internal_error = |error: relay_common::error::StoreError| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(error.to_string())),
        )
    };

    let pending = state
        .task_store
        .count_by_status(TaskStatus::Pending)
        .await
        .map_err(internal_error)?;
    let processing = state
        .task_store
        .count_by_status(TaskStatus::Processing)
        .await
        .map_err(internal_error)?;
    let success = state
        .task_store
        .count_by_status(TaskStatus::Success)
        .await
        .map_err(internal_error)?;
    let failed = state
        .task_store
        .count_by_status(TaskStatus::Failed)
        .await
        .map_err(internal_error)?;

    let queue_size = state.queue.size().await.map_err(|error| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(error.to_string())),
        )
    })?;

    Ok(Json(StatsResponse {
        queue_size,
        task_stats: TaskStats {
            pending,
            processing,
            success,
            failed,
        },
        timestamp: Utc::now(),
    }))
}

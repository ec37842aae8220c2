//! Handlers for `/v1/notifications`, the HTTP surface onto the intake
//! service, task lookup, attempt logs, and manual retry (spec §6).

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use relay_common::intake::IntakeService;
use relay_common::model::{HttpMethod, NewTask, Task, TaskStatus};
use serde::Serialize;
use serde_derive::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::state::AppState;

const MIN_MAX_RETRIES: i32 = 1;
const MAX_MAX_RETRIES: i32 = 10;
const MAX_SOURCE_SYSTEM_LEN: usize = 100;

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn internal_error<E: std::fmt::Display>(error: E) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationRequest {
    source_system: String,
    target_url: String,
    #[serde(default)]
    http_method: HttpMethod,
    #[serde(default)]
    headers: HashMap<String, String>,
    body: Option<serde_json::Value>,
    #[serde(default = "default_max_retries")]
    max_retries: i32,
}

fn default_max_retries() -> i32 {
    5
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationResponse {
    task_id: Uuid,
    status: TaskStatus,
    message: String,
}

fn validate(payload: &CreateNotificationRequest) -> Result<(), String> {
    if payload.source_system.is_empty() || payload.source_system.chars().count() > MAX_SOURCE_SYSTEM_LEN {
        return Err("sourceSystem must be 1-100 characters".to_owned());
    }

    if !payload.target_url.starts_with("http://") && !payload.target_url.starts_with("https://") {
        return Err("targetUrl must be an http:// or https:// URL".to_owned());
    }

    if payload.body.as_ref().map_or(true, serde_json::Value::is_null) {
        return Err("body is required and must not be null".to_owned());
    }

    if payload.max_retries < MIN_MAX_RETRIES || payload.max_retries > MAX_MAX_RETRIES {
        return Err(format!(
            "maxRetries must be between {MIN_MAX_RETRIES} and {MAX_MAX_RETRIES}"
        ));
    }

    Ok(())
}

pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<CreateNotificationRequest>,
) -> Result<(StatusCode, Json<CreateNotificationResponse>), (StatusCode, Json<ErrorResponse>)> {
    if let Err(message) = validate(&payload) {
        return Err(bad_request(message));
    }

    let intake = IntakeService::new(state.task_store, state.queue);
    let new_task = NewTask {
        source_system: payload.source_system,
        target_url: payload.target_url,
        http_method: payload.http_method,
        headers: payload.headers,
        body: payload.body.unwrap_or(serde_json::Value::Null),
        max_retries: payload.max_retries,
    };

    let created = intake.create_task(new_task).await.map_err(|error| {
        error!(%error, "failed to persist notification task");
        internal_error(error)
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateNotificationResponse {
            task_id: created.task_id,
            status: created.status,
            message: "notification task accepted".to_owned(),
        }),
    ))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<Task>, (StatusCode, Json<ErrorResponse>)> {
    match state.task_store.find_by_task_id(task_id).await {
        Ok(Some(task)) => Ok(Json(task)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "no such notification task".to_owned(),
            }),
        )),
        Err(error) => Err(internal_error(error)),
    }
}

pub async fn get_logs(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<Vec<relay_common::model::AttemptLog>>, (StatusCode, Json<ErrorResponse>)> {
    if state
        .task_store
        .find_by_task_id(task_id)
        .await
        .map_err(internal_error)?
        .is_none()
    {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "no such notification task".to_owned(),
            }),
        ));
    }

    let logs = state
        .log_store
        .find_by_task_id(task_id)
        .await
        .map_err(internal_error)?;

    Ok(Json(logs))
}

pub async fn retry(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<Task>, (StatusCode, Json<ErrorResponse>)> {
    let existing = state
        .task_store
        .find_by_task_id(task_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: "no such notification task".to_owned(),
                }),
            )
        })?;

    if existing.status != TaskStatus::Failed {
        return Err(bad_request(
            "only a FAILED notification task can be retried",
        ));
    }

    let now = Utc::now();
    let claimed = state
        .task_store
        .compare_and_set_status(task_id, TaskStatus::Failed, TaskStatus::Pending, now)
        .await
        .map_err(internal_error)?;

    if !claimed {
        return Err(bad_request(
            "notification task changed state concurrently; retry not applied",
        ));
    }

    let mut task = state
        .task_store
        .find_by_task_id(task_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: "no such notification task".to_owned(),
                }),
            )
        })?;

    task.reset_for_manual_retry(now);
    state
        .task_store
        .save(&task)
        .await
        .map_err(internal_error)?;

    if let Err(error) = state.queue.push(task_id).await {
        warn!(%task_id, %error, "manual retry failed to enqueue task");
    }

    Ok(Json(task))
}

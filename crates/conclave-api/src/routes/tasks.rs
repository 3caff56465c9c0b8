use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use conclave_shared::domain::ProgressEvent;
use uuid::Uuid;
use validator::Validate;

use crate::dto::{CreateTaskRequest, SinceQuery, TaskCreatedResponse, TaskSummary};
use crate::error::ApiError;
use crate::AppState;

/// `POST /tasks` (§6): validates the request, selects a plan, and returns
/// as soon as the task is durably created. Execution proceeds in the
/// background.
#[utoipa::path(
    post,
    path = "/tasks",
    request_body = CreateTaskRequest,
    responses(
        (status = 201, description = "Task created", body = TaskCreatedResponse),
        (status = 400, description = "Validation failure"),
        (status = 503, description = "Store or broker unavailable"),
    ),
)]
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskCreatedResponse>), ApiError> {
    request
        .validate()
        .map_err(|err| ApiError(conclave_shared::errors::ConclaveError::InvalidInput(err.to_string())))?;

    let task = state
        .coordinator
        .create_task(request.user_id, request.query, request.template)
        .await?;

    Ok((StatusCode::CREATED, Json(TaskCreatedResponse { task_id: task.task_id })))
}

/// `GET /tasks/{id}` (§6): the record without large fields.
#[utoipa::path(
    get,
    path = "/tasks/{id}",
    responses(
        (status = 200, description = "Task summary", body = TaskSummary),
        (status = 404, description = "No such task"),
    ),
)]
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskSummary>, ApiError> {
    let task = state.coordinator.get_status(id).await?;
    Ok(Json(task.into()))
}

/// `GET /tasks/{id}/progress?since=` (§6): new progress entries since the
/// given timestamp. Clients are expected to poll this on an interval.
#[utoipa::path(
    get,
    path = "/tasks/{id}/progress",
    responses((status = 200, description = "Progress entries since the given timestamp")),
)]
pub async fn get_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<SinceQuery>,
) -> Result<Json<Vec<ProgressEvent>>, ApiError> {
    let mut events = state.coordinator.get_progress(id).await?;
    if let Some(since) = query.since {
        events.retain(|event| event.timestamp > since);
    }
    Ok(Json(events))
}

/// `POST /tasks/{id}/abort` (§6): idempotent; returns the resulting status.
#[utoipa::path(
    post,
    path = "/tasks/{id}/abort",
    responses((status = 200, description = "Current task status after the abort request", body = TaskSummary)),
)]
pub async fn abort_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskSummary>, ApiError> {
    let task = state.coordinator.abort(id).await?;
    Ok(Json(task.into()))
}

//! Batch task endpoints.
//!
//! Creating or re-running a task only makes it `pending`; the scheduler
//! picks it up on its next poll (or immediately, if it is woken).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use batcher_core::Dimension;
use utoipa::OpenApi;
use validator::Validate;

use crate::error::ServerError;
use crate::schemas::v1::task::{
    CombinationResultResponse, CreateTaskRequest, CreateTaskResponse, DimensionRequest,
    ListTasksQuery, PreviewRequest, PreviewResponse, RunTaskResponse, TaskResponse,
    TaskSummaryResponse,
};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(list_tasks, create_task, preview_task, get_task, delete_task, run_task),
    components(schemas(
        CombinationResultResponse,
        CreateTaskRequest,
        CreateTaskResponse,
        DimensionRequest,
        PreviewRequest,
        PreviewResponse,
        RunTaskResponse,
        TaskResponse,
        TaskSummaryResponse
    ))
)]
pub struct TasksApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/preview", post(preview_task))
        .route("/tasks/{id}", get(get_task).delete(delete_task))
        .route("/tasks/{id}/run", post(run_task))
}

fn dimensions(requests: Vec<DimensionRequest>) -> Vec<Dimension> {
    requests.into_iter().map(Dimension::from).collect()
}

#[utoipa::path(
    get,
    path = "/v1/tasks",
    tag = "tasks",
    params(ListTasksQuery),
    responses(
        (status = 200, description = "One page of tasks, newest first", body = [TaskSummaryResponse]),
        (status = 400, description = "Invalid paging"),
        (status = 500, description = "Store error"),
    )
)]
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListTasksQuery>,
) -> Result<Json<Vec<TaskSummaryResponse>>, ServerError> {
    q.validate()?;
    let tasks = state.service.list_tasks(q.limit, q.offset).await?;
    Ok(Json(tasks.into_iter().map(TaskSummaryResponse::from).collect()))
}

#[utoipa::path(
    post,
    path = "/v1/tasks",
    tag = "tasks",
    request_body = CreateTaskRequest,
    responses(
        (status = 201, description = "Task queued", body = CreateTaskResponse),
        (status = 400, description = "No valid parameters, too many combinations, or invalid request"),
        (status = 500, description = "Store error"),
    )
)]
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<CreateTaskResponse>), ServerError> {
    req.validate()?;
    let created = state
        .service
        .create_task(
            req.name.as_deref(),
            req.template,
            &req.target_id,
            &dimensions(req.dimensions),
        )
        .await?;
    state.wake_scheduler();

    Ok((
        StatusCode::CREATED,
        Json(CreateTaskResponse {
            id: created.id,
            total_count: created.total_count,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/v1/tasks/preview",
    tag = "tasks",
    request_body = PreviewRequest,
    responses(
        (status = 200, description = "Expanded combinations; nothing is stored", body = PreviewResponse),
        (status = 400, description = "Too many combinations or invalid request"),
    )
)]
pub async fn preview_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PreviewRequest>,
) -> Result<Json<PreviewResponse>, ServerError> {
    req.validate()?;
    let combinations = state
        .service
        .preview(&req.target_id, &dimensions(req.dimensions))?;
    Ok(Json(PreviewResponse {
        total_count: combinations.len(),
        combinations,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/tasks/{id}",
    tag = "tasks",
    params(
        ("id" = i64, Path, description = "Task id")
    ),
    responses(
        (status = 200, description = "Task retrieved", body = TaskResponse),
        (status = 404, description = "Task not found"),
    )
)]
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<TaskResponse>, ServerError> {
    let task = state.service.get_task(id).await?;
    Ok(Json(task.into()))
}

#[utoipa::path(
    delete,
    path = "/v1/tasks/{id}",
    tag = "tasks",
    params(
        ("id" = i64, Path, description = "Task id")
    ),
    responses(
        (status = 204, description = "Task deleted"),
        (status = 404, description = "Task not found"),
    )
)]
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ServerError> {
    state.service.delete_task(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/tasks/{id}/run",
    tag = "tasks",
    params(
        ("id" = i64, Path, description = "Task id")
    ),
    responses(
        (status = 200, description = "Task is pending", body = RunTaskResponse),
        (status = 404, description = "Task not found"),
        (status = 409, description = "Task is already running"),
    )
)]
pub async fn run_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<RunTaskResponse>, ServerError> {
    let status = state.service.run_task(id).await?;
    state.wake_scheduler();
    Ok(Json(RunTaskResponse {
        id,
        status: status.to_string(),
    }))
}

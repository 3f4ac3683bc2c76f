//! REST endpoints for job status, enqueue and segment drops.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tracing::info;

use crate::error::SchedulerError;
use crate::scheduler::TaskScheduler;
use crate::store::SegmentRegistry;
use crate::task::{JobSpec, TaskId, TaskRecord};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<TaskScheduler>,
    pub segments: Arc<SegmentRegistry>,
}

/// Build the coordinator router.
pub fn coordinator_routes(scheduler: Arc<TaskScheduler>, segments: Arc<SegmentRegistry>) -> Router {
    let state = AppState {
        scheduler,
        segments,
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/jobs", get(list_jobs).post(enqueue_job))
        .route("/api/v1/jobs/stats", get(job_stats))
        .route("/api/v1/jobs/query", post(query_jobs))
        .route("/api/v1/jobs/{id}", get(get_job))
        .route("/api/v1/segments/{id}/drop", post(drop_segment))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "scheduler_running": state.scheduler.is_running(),
    }))
}

async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.list_tasks().await)
}

async fn job_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.stats().await)
}

#[derive(Debug, Deserialize)]
struct QueryJobsBody {
    task_ids: Vec<TaskId>,
}

async fn query_jobs(
    State(state): State<AppState>,
    Json(body): Json<QueryJobsBody>,
) -> impl IntoResponse {
    Json(state.scheduler.query_jobs(&body.task_ids).await)
}

async fn get_job(State(state): State<AppState>, Path(id): Path<TaskId>) -> impl IntoResponse {
    match state.scheduler.get_task(id).await {
        Some(task) => (StatusCode::OK, Json(serde_json::json!(task))),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Task not found"})),
        ),
    }
}

#[derive(Debug, Deserialize)]
struct EnqueueBody {
    task_id: TaskId,
    #[serde(default)]
    cluster_id: String,
    job: JobSpec,
}

async fn enqueue_job(
    State(state): State<AppState>,
    Json(body): Json<EnqueueBody>,
) -> impl IntoResponse {
    let task = TaskRecord::new(body.task_id, body.cluster_id, body.job);
    match state.scheduler.enqueue(task).await {
        Ok(()) => (
            StatusCode::CREATED,
            Json(serde_json::json!({"task_id": body.task_id, "state": "init"})),
        ),
        Err(e) => {
            let status = match e {
                SchedulerError::DuplicateTask { .. } => StatusCode::CONFLICT,
                SchedulerError::Stopped | SchedulerError::Persist { .. } => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::BAD_REQUEST,
            };
            (status, Json(serde_json::json!({"error": e.to_string()})))
        }
    }
}

async fn drop_segment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    state.segments.drop_segment(id);
    let removed = state.scheduler.on_segment_dropped(id).await;
    info!(segment_id = id, removed = removed.len(), "Segment drop received");
    Json(serde_json::json!({"segment_id": id, "removed_tasks": removed}))
}

//! HTTP transport for clients and remote workers.
//!
//! | Method | Path                                   | Purpose                 |
//! |--------|----------------------------------------|-------------------------|
//! | POST   | `/tasks`                               | submit a task           |
//! | GET    | `/tasks`                               | list tasks              |
//! | GET    | `/tasks/:id`                           | task status             |
//! | GET    | `/workers`                             | fleet status            |
//! | POST   | `/workers/:id/heartbeat`               | heartbeat / register    |
//! | POST   | `/workers/:id/assign`                  | poll for an assignment  |
//! | POST   | `/workers/:id/tasks/:task_id/start`    | acknowledge start       |
//! | POST   | `/workers/:id/tasks/:task_id/result`   | report a result         |
//! | GET    | `/stats`                               | aggregated counters     |

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::error::SchedulerError;
use crate::scheduler::{
    Assignment, Priority, Scheduler, SchedulerStats, SubmitRequest, Task, TaskFilter, TaskId,
    TaskResult, TaskStatus, WorkerId, WorkerRecord,
};

#[derive(Clone)]
pub struct ApiState {
    pub scheduler: Arc<Scheduler>,
    pub stats: Option<Arc<SchedulerStats>>,
}

/// Priority as clients send it: a name or a numeric level.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PriorityField {
    Level(i64),
    Name(String),
}

impl std::fmt::Display for PriorityField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriorityField::Level(level) => write!(f, "{level}"),
            PriorityField::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTaskRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub command: String,
    pub priority: PriorityField,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListTasksQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultReport {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
}

#[derive(Serialize)]
struct WorkersResponse {
    worker_count: usize,
    idle_workers: Vec<WorkerId>,
    workers: Vec<WorkerRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub assignment: Option<Assignment>,
}

#[derive(Serialize)]
struct StatsResponse {
    queue_length: usize,
    worker_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    counters: Option<crate::scheduler::events::StatsSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for SchedulerError {
    fn into_response(self) -> Response {
        let status = match &self {
            SchedulerError::TaskNotFound(_) | SchedulerError::WorkerNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            SchedulerError::InvalidPriority(_)
            | SchedulerError::InvalidStatus(_)
            | SchedulerError::Config(_) => StatusCode::BAD_REQUEST,
            SchedulerError::InvalidTransition { .. }
            | SchedulerError::NotAssigned { .. }
            | SchedulerError::WorkerBusy { .. } => StatusCode::CONFLICT,
            SchedulerError::Http(_) | SchedulerError::Api { .. } => StatusCode::BAD_GATEWAY,
            SchedulerError::DuplicateId(_)
            | SchedulerError::Io(_)
            | SchedulerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/tasks", post(submit_task).get(list_tasks))
        .route("/tasks/:id", get(get_task))
        .route("/workers", get(list_workers))
        .route("/workers/:id/heartbeat", post(heartbeat))
        .route("/workers/:id/assign", post(assign_next))
        .route("/workers/:id/tasks/:task_id/start", post(start_task))
        .route("/workers/:id/tasks/:task_id/result", post(report_result))
        .route("/stats", get(stats))
        .layer(cors)
        .with_state(state)
}

/// Serve the API until `shutdown` fires.
pub async fn serve(
    addr: SocketAddr,
    state: ApiState,
    shutdown: CancellationToken,
) -> Result<(), SchedulerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "HTTP API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

async fn submit_task(
    State(state): State<ApiState>,
    Json(payload): Json<SubmitTaskRequest>,
) -> Result<impl IntoResponse, SchedulerError> {
    let request = SubmitRequest::new(payload.name, payload.command, payload.priority)
        .with_description(payload.description);
    let submission = state.scheduler.submit(request).await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

async fn list_tasks(
    State(state): State<ApiState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Vec<Task>>, SchedulerError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<TaskStatus>)
        .transpose()?;
    let priority = query
        .priority
        .as_deref()
        .map(str::parse::<Priority>)
        .transpose()?;
    let tasks = state
        .scheduler
        .list_tasks(TaskFilter { status, priority })
        .await;
    Ok(Json(tasks))
}

async fn get_task(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, SchedulerError> {
    let task = state.scheduler.get_task(&TaskId::from(id)).await?;
    Ok(Json(task))
}

async fn list_workers(State(state): State<ApiState>) -> Json<WorkersResponse> {
    let workers = state.scheduler.workers().await;
    let idle_workers = state.scheduler.idle_workers().await;
    Json(WorkersResponse {
        worker_count: workers.len(),
        idle_workers,
        workers,
    })
}

async fn heartbeat(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<HeartbeatResponse>, SchedulerError> {
    let assignment = state.scheduler.heartbeat(&WorkerId::from(id)).await?;
    Ok(Json(HeartbeatResponse { assignment }))
}

async fn assign_next(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Response, SchedulerError> {
    match state.scheduler.assign_next(&WorkerId::from(id)).await? {
        Some(assignment) => Ok(Json(assignment).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

async fn start_task(
    State(state): State<ApiState>,
    Path((worker_id, task_id)): Path<(String, String)>,
) -> Result<Json<Task>, SchedulerError> {
    let task = state
        .scheduler
        .start_task(&WorkerId::from(worker_id), &TaskId::from(task_id))
        .await?;
    Ok(Json(task))
}

async fn report_result(
    State(state): State<ApiState>,
    Path((worker_id, task_id)): Path<(String, String)>,
    Json(report): Json<ResultReport>,
) -> Result<Json<Task>, SchedulerError> {
    let result = TaskResult {
        task_id: TaskId::from(task_id),
        success: report.success,
        output: report.output,
        error: report.error,
        completed_at: state.scheduler.now(),
    };
    let task = state
        .scheduler
        .report_result(&WorkerId::from(worker_id), result)
        .await?;
    Ok(Json(task))
}

async fn stats(State(state): State<ApiState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        queue_length: state.scheduler.queue_len().await,
        worker_count: state.scheduler.worker_count().await,
        counters: state.stats.as_ref().map(|s| s.snapshot()),
    })
}

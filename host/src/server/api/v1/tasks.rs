use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{debug_handler, Extension, Json, Router};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, OpenApi, ToSchema};
use uuid::Uuid;

use reyestr_db::cache::{task_list_key, tasks_summary_key, worker_statistics_key};
use reyestr_db::Db;
use reyestr_lib::{
    NewTask, SearchParams, Task, TaskCounters, TaskIndexBucket, TaskStatus, TasksSummary,
    DEFAULT_CONCURRENT_CONNECTIONS,
};

use crate::interfaces::{ErrorEnvelope, HostError, HostResult};
use crate::metrics::{
    inc_task_claimed_count, inc_task_completed_count, inc_task_created_count,
    inc_task_failed_count,
};
use crate::server::auth::{require_admin, require_worker, Principal};
use crate::HostState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTaskRequest {
    pub search_params: Option<SearchParams>,
    pub start_page: Option<u32>,
    pub max_documents: Option<u32>,
    pub concurrent_connections: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateTaskResponse {
    pub task_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProgressRequest {
    pub task_id: Uuid,
    pub downloaded: i64,
    pub failed: i64,
    pub skipped: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CompleteRequest {
    pub task_id: Uuid,
    pub documents_downloaded: i64,
    pub documents_failed: i64,
    pub documents_skipped: i64,
    pub result_summary: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FailRequest {
    pub task_id: Uuid,
    pub error_message: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelRequest {
    pub task_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListTasksResponse {
    pub summary: TasksSummary,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListTasksQuery {
    pub status_filter: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ByIndexQuery {
    pub court_region: Option<String>,
    pub instance_type: Option<String>,
    /// DD.MM.YYYY
    pub date_start: Option<String>,
    /// DD.MM.YYYY
    pub date_end: Option<String>,
}

const LIST_LIMIT_DEFAULT: usize = 50;
const LIST_LIMIT_MAX: usize = 500;

fn counters_from(downloaded: i64, failed: i64, skipped: i64) -> HostResult<TaskCounters> {
    if downloaded < 0 || failed < 0 || skipped < 0 {
        return Err(HostError::BadRequest(
            "counters must be non-negative".to_string(),
        ));
    }
    Ok(TaskCounters {
        downloaded,
        failed,
        skipped,
    })
}

#[utoipa::path(post, path = "/tasks/create",
    tag = "Tasks",
    request_body = CreateTaskRequest,
    responses (
        (status = 200, description = "Successfully created download task", body = CreateTaskResponse)
    )
)]
#[debug_handler(state = HostState)]
/// Create a download task.
///
/// Inserts a pending task for the given search query and paging window.
/// Duplicate queries are allowed; re-running a search is an expected
/// operation.
async fn create_handler(
    State(state): State<HostState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<CreateTaskRequest>,
) -> HostResult<Json<CreateTaskResponse>> {
    require_admin(&state.api_keys, &principal)?;

    let search_params = req
        .search_params
        .ok_or_else(|| HostError::BadRequest("missing field search_params".to_string()))?
        .normalize();
    if let Err(key) = search_params.check_dates() {
        return Err(HostError::bad_request_with(
            "malformed date in search_params",
            serde_json::json!({ "field": key, "expected": "DD.MM.YYYY" }),
        ));
    }
    let start_page = req
        .start_page
        .ok_or_else(|| HostError::BadRequest("missing field start_page".to_string()))?;
    let max_documents = req
        .max_documents
        .ok_or_else(|| HostError::BadRequest("missing field max_documents".to_string()))?;
    if start_page < 1 {
        return Err(HostError::BadRequest("start_page must be >= 1".to_string()));
    }
    if max_documents < 1 {
        return Err(HostError::BadRequest(
            "max_documents must be >= 1".to_string(),
        ));
    }
    let concurrent_connections = req
        .concurrent_connections
        .unwrap_or(DEFAULT_CONCURRENT_CONNECTIONS)
        .max(1);

    let task = state
        .db
        .create_task(NewTask {
            search_params,
            start_page,
            max_documents,
            concurrent_connections,
        })
        .await?;
    inc_task_created_count();

    state.cache.invalidate_prefix("tasks:").await;
    Ok(Json(CreateTaskResponse { task_id: task.id }))
}

#[utoipa::path(post, path = "/tasks/request",
    tag = "Tasks",
    responses (
        (status = 200, description = "A pending task was assigned to the caller", body = Task),
        (status = 204, description = "No pending task is available")
    )
)]
#[debug_handler(state = HostState)]
/// Request a task assignment.
///
/// Atomically claims the oldest pending task for the calling worker. When
/// the queue is empty the call returns immediately with 204; workers are
/// expected to poll with backoff.
async fn request_handler(
    State(state): State<HostState>,
    Extension(principal): Extension<Principal>,
) -> HostResult<Response> {
    let worker = require_worker(&principal)?;

    match state.db.request_task(worker.id).await? {
        Some(task) => {
            inc_task_claimed_count();
            state.cache.invalidate_prefix("tasks:").await;
            Ok(Json(task).into_response())
        }
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

#[utoipa::path(post, path = "/tasks/progress",
    tag = "Tasks",
    request_body = ProgressRequest,
    responses (
        (status = 200, description = "Progress recorded"),
        (status = 409, description = "Task not held by the caller or counters regressed", body = ErrorEnvelope)
    )
)]
#[debug_handler(state = HostState)]
/// Report task progress.
///
/// Counters are cumulative and must never regress. The first report moves
/// the task to in_progress.
async fn progress_handler(
    State(state): State<HostState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<ProgressRequest>,
) -> HostResult<Json<serde_json::Value>> {
    let worker = require_worker(&principal)?;
    let counters = counters_from(req.downloaded, req.failed, req.skipped)?;

    state
        .db
        .report_progress(req.task_id, worker.id, counters)
        .await?;

    state.cache.invalidate_prefix("tasks:").await;
    Ok(Json(serde_json::json!({})))
}

#[utoipa::path(post, path = "/tasks/complete",
    tag = "Tasks",
    request_body = CompleteRequest,
    responses (
        (status = 200, description = "Task completed"),
        (status = 409, description = "Task not held by the caller", body = ErrorEnvelope)
    )
)]
#[debug_handler(state = HostState)]
/// Complete a task.
///
/// Writes the final counters and credits the worker's cumulative totals in
/// the same transaction.
async fn complete_handler(
    State(state): State<HostState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<CompleteRequest>,
) -> HostResult<Json<serde_json::Value>> {
    let worker = require_worker(&principal)?;
    let counters = counters_from(
        req.documents_downloaded,
        req.documents_failed,
        req.documents_skipped,
    )?;

    state
        .db
        .complete_task(req.task_id, worker.id, counters, req.result_summary)
        .await?;
    inc_task_completed_count();

    state.cache.invalidate_prefix("tasks:").await;
    state
        .cache
        .invalidate(&[worker_statistics_key(worker.id)])
        .await;
    Ok(Json(serde_json::json!({})))
}

#[utoipa::path(post, path = "/tasks/fail",
    tag = "Tasks",
    request_body = FailRequest,
    responses (
        (status = 200, description = "Task failure recorded"),
        (status = 409, description = "Task not held by the caller", body = ErrorEnvelope)
    )
)]
#[debug_handler(state = HostState)]
/// Report a fatal task failure.
async fn fail_handler(
    State(state): State<HostState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<FailRequest>,
) -> HostResult<Json<serde_json::Value>> {
    let worker = require_worker(&principal)?;
    if req.error_message.trim().is_empty() {
        return Err(HostError::BadRequest(
            "error_message must not be empty".to_string(),
        ));
    }

    state
        .db
        .fail_task(req.task_id, worker.id, &req.error_message)
        .await?;
    inc_task_failed_count();

    state.cache.invalidate_prefix("tasks:").await;
    state
        .cache
        .invalidate(&[worker_statistics_key(worker.id)])
        .await;
    Ok(Json(serde_json::json!({})))
}

#[utoipa::path(post, path = "/tasks/cancel",
    tag = "Tasks",
    request_body = CancelRequest,
    responses (
        (status = 200, description = "Task cancelled"),
        (status = 409, description = "Task already terminal", body = ErrorEnvelope)
    )
)]
#[debug_handler(state = HostState)]
/// Cancel a task from any non-terminal state.
async fn cancel_handler(
    State(state): State<HostState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<CancelRequest>,
) -> HostResult<Json<serde_json::Value>> {
    require_admin(&state.api_keys, &principal)?;

    state.db.cancel_task(req.task_id).await?;
    state.cache.invalidate_prefix("tasks:").await;
    Ok(Json(serde_json::json!({})))
}

#[utoipa::path(get, path = "/tasks",
    tag = "Tasks",
    params(ListTasksQuery),
    responses (
        (status = 200, description = "Task summary and listing", body = ListTasksResponse)
    )
)]
#[debug_handler(state = HostState)]
/// List tasks with a per-status summary.
async fn list_handler(
    State(state): State<HostState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ListTasksQuery>,
) -> HostResult<Json<ListTasksResponse>> {
    require_admin(&state.api_keys, &principal)?;

    let status_filter = query
        .status_filter
        .as_deref()
        .filter(|raw| !raw.is_empty())
        .map(|raw| {
            raw.parse::<TaskStatus>()
                .map_err(HostError::BadRequest)
        })
        .transpose()?;
    let limit = query
        .limit
        .unwrap_or(LIST_LIMIT_DEFAULT)
        .clamp(1, LIST_LIMIT_MAX);

    let key = task_list_key(status_filter, limit);
    if let Some(cached) = state.cache.get_json::<ListTasksResponse>(&key).await {
        return Ok(Json(cached));
    }

    let (summary, tasks) = state.db.list_tasks(status_filter, limit).await?;
    let response = ListTasksResponse { summary, tasks };

    let ttl = state.cache.ttl.tasks;
    state.cache.put_json(&key, &response, ttl).await;
    state
        .cache
        .put_json(&tasks_summary_key(), &response.summary, ttl)
        .await;
    Ok(Json(response))
}

#[utoipa::path(get, path = "/tasks/indexes",
    tag = "Tasks",
    responses (
        (status = 200, description = "Tasks grouped by court region, instance type and date range", body = [TaskIndexBucket])
    )
)]
#[debug_handler(state = HostState)]
/// The task map: per-(region, instance, date range) totals.
async fn indexes_handler(
    State(state): State<HostState>,
    Extension(principal): Extension<Principal>,
) -> HostResult<Json<Vec<TaskIndexBucket>>> {
    require_admin(&state.api_keys, &principal)?;
    Ok(Json(state.db.task_indexes().await?))
}

#[utoipa::path(get, path = "/tasks/by-index",
    tag = "Tasks",
    params(ByIndexQuery),
    responses (
        (status = 200, description = "Tasks of one index bucket", body = [Task])
    )
)]
#[debug_handler(state = HostState)]
/// Tasks of a single index bucket.
async fn by_index_handler(
    State(state): State<HostState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ByIndexQuery>,
) -> HostResult<Json<Vec<Task>>> {
    require_admin(&state.api_keys, &principal)?;

    let date_start = query
        .date_start
        .as_deref()
        .filter(|raw| !raw.is_empty())
        .map(|raw| {
            SearchParams::parse_date(raw)
                .ok_or_else(|| HostError::BadRequest("malformed date_start".to_string()))
        })
        .transpose()?;
    let date_end = query
        .date_end
        .as_deref()
        .filter(|raw| !raw.is_empty())
        .map(|raw| {
            SearchParams::parse_date(raw)
                .ok_or_else(|| HostError::BadRequest("malformed date_end".to_string()))
        })
        .transpose()?;

    let tasks = state
        .db
        .tasks_by_index(
            query.court_region.as_deref().filter(|raw| !raw.is_empty()),
            query.instance_type.as_deref().filter(|raw| !raw.is_empty()),
            date_start,
            date_end,
        )
        .await?;
    Ok(Json(tasks))
}

#[utoipa::path(get, path = "/tasks/{task_id}",
    tag = "Tasks",
    params(("task_id" = Uuid, Path, description = "Task id")),
    responses (
        (status = 200, description = "The task", body = Task),
        (status = 404, description = "Unknown task", body = ErrorEnvelope)
    )
)]
#[debug_handler(state = HostState)]
/// Fetch one task.
async fn get_handler(
    State(state): State<HostState>,
    Extension(principal): Extension<Principal>,
    Path(task_id): Path<Uuid>,
) -> HostResult<Json<Task>> {
    require_admin(&state.api_keys, &principal)?;

    let task = state
        .db
        .get_task(task_id)
        .await?
        .ok_or_else(|| HostError::NotFound("task".to_string()))?;
    Ok(Json(task))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        create_handler,
        request_handler,
        progress_handler,
        complete_handler,
        fail_handler,
        cancel_handler,
        list_handler,
        indexes_handler,
        by_index_handler,
        get_handler
    ),
    components(schemas(
        CreateTaskRequest,
        CreateTaskResponse,
        ProgressRequest,
        CompleteRequest,
        FailRequest,
        CancelRequest,
        ListTasksResponse
    ))
)]
struct Docs;

pub fn create_docs() -> utoipa::openapi::OpenApi {
    Docs::openapi()
}

pub fn create_router() -> Router<HostState> {
    Router::new()
        .route("/", get(list_handler))
        .route("/create", post(create_handler))
        .route("/request", post(request_handler))
        .route("/progress", post(progress_handler))
        .route("/complete", post(complete_handler))
        .route("/fail", post(fail_handler))
        .route("/cancel", post(cancel_handler))
        .route("/indexes", get(indexes_handler))
        .route("/by-index", get(by_index_handler))
        .route("/:task_id", get(get_handler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_counters_are_rejected() {
        assert!(counters_from(-1, 0, 0).is_err());
        assert!(counters_from(0, -1, 0).is_err());
        assert!(counters_from(0, 0, -1).is_err());
        assert_eq!(
            counters_from(3, 2, 1).unwrap(),
            TaskCounters {
                downloaded: 3,
                failed: 2,
                skipped: 1
            }
        );
    }

    #[test]
    fn unknown_body_fields_are_ignored() {
        let req: CreateTaskRequest = serde_json::from_value(serde_json::json!({
            "search_params": {"CourtRegion": "14"},
            "start_page": 1,
            "max_documents": 10,
            "stray": true,
        }))
        .unwrap();
        assert_eq!(req.start_page, Some(1));
        assert!(req.search_params.is_some());
    }
}

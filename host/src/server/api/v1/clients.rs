use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{debug_handler, Extension, Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use reyestr_db::cache::worker_statistics_key;
use reyestr_db::Db;
use reyestr_lib::{Worker, WorkerActivity, WorkerStatistics};

use crate::interfaces::{ErrorEnvelope, HostError, HostResult};
use crate::metrics::inc_worker_registered_count;
use crate::server::auth::{
    require_admin, require_admin_or_self, require_worker, Principal,
};
use crate::HostState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterClientRequest {
    pub client_name: String,
    pub client_host: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegisterClientResponse {
    pub client_id: Uuid,
    pub api_key: String,
}

#[utoipa::path(post, path = "/clients/register",
    tag = "Clients",
    request_body = RegisterClientRequest,
    responses (
        (status = 200, description = "Worker registered", body = RegisterClientResponse),
        (status = 409, description = "Supplied api key already in use", body = ErrorEnvelope)
    )
)]
#[debug_handler(state = HostState)]
/// Register a worker.
///
/// A row with a matching name and secret is reused; otherwise a new worker
/// is created and, when no secret was supplied, a fresh one is generated.
/// The returned key authenticates every subsequent call.
async fn register_handler(
    State(state): State<HostState>,
    Json(req): Json<RegisterClientRequest>,
) -> HostResult<Json<RegisterClientResponse>> {
    let name = req.client_name.trim();
    if name.is_empty() {
        return Err(HostError::BadRequest(
            "client_name must not be empty".to_string(),
        ));
    }

    let worker = state
        .db
        .register_worker(
            name,
            req.client_host.as_deref(),
            req.api_key.as_deref().filter(|key| !key.is_empty()),
        )
        .await?;
    inc_worker_registered_count();

    Ok(Json(RegisterClientResponse {
        client_id: worker.id,
        api_key: worker.api_key.clone().unwrap_or_default(),
    }))
}

#[utoipa::path(post, path = "/clients/heartbeat",
    tag = "Clients",
    responses (
        (status = 200, description = "Heartbeat recorded"),
        (status = 401, description = "Missing or invalid worker credential", body = ErrorEnvelope)
    )
)]
#[debug_handler(state = HostState)]
/// Refresh worker liveness.
///
/// Idempotent; forces the worker back to active.
async fn heartbeat_handler(
    State(state): State<HostState>,
    Extension(principal): Extension<Principal>,
) -> HostResult<Json<serde_json::Value>> {
    let worker = require_worker(&principal)?;
    state.db.heartbeat(worker.id).await?;
    Ok(Json(serde_json::json!({})))
}

#[utoipa::path(get, path = "/clients",
    tag = "Clients",
    responses (
        (status = 200, description = "All registered workers", body = [Worker])
    )
)]
#[debug_handler(state = HostState)]
/// List registered workers.
async fn list_handler(
    State(state): State<HostState>,
    Extension(principal): Extension<Principal>,
) -> HostResult<Json<Vec<Worker>>> {
    require_admin(&state.api_keys, &principal)?;
    Ok(Json(state.db.list_workers().await?))
}

#[utoipa::path(get, path = "/clients/{client_id}/statistics",
    tag = "Clients",
    params(("client_id" = Uuid, Path, description = "Worker id")),
    responses (
        (status = 200, description = "Worker statistics", body = WorkerStatistics),
        (status = 403, description = "Workers may only read their own statistics", body = ErrorEnvelope),
        (status = 404, description = "Unknown worker", body = ErrorEnvelope)
    )
)]
#[debug_handler(state = HostState)]
/// Per-worker statistics.
///
/// Visible to admins and to the worker itself.
async fn statistics_handler(
    State(state): State<HostState>,
    Extension(principal): Extension<Principal>,
    Path(client_id): Path<Uuid>,
) -> HostResult<Json<WorkerStatistics>> {
    require_admin_or_self(&state.api_keys, &principal, client_id)?;

    let key = worker_statistics_key(client_id);
    if let Some(cached) = state.cache.get_json::<WorkerStatistics>(&key).await {
        return Ok(Json(cached));
    }

    let statistics = state.db.worker_statistics(client_id).await?;
    let ttl = state.cache.ttl.statistics;
    state.cache.put_json(&key, &statistics, ttl).await;
    Ok(Json(statistics))
}

#[utoipa::path(get, path = "/clients/{client_id}/activity",
    tag = "Clients",
    params(("client_id" = Uuid, Path, description = "Worker id")),
    responses (
        (status = 200, description = "Live worker activity snapshot", body = WorkerActivity),
        (status = 404, description = "Unknown worker", body = ErrorEnvelope)
    )
)]
#[debug_handler(state = HostState)]
/// Live activity snapshot: current task, throughput estimate, session and
/// lifetime stats, recent errors.
async fn activity_handler(
    State(state): State<HostState>,
    Extension(principal): Extension<Principal>,
    Path(client_id): Path<Uuid>,
) -> HostResult<Json<WorkerActivity>> {
    require_admin(&state.api_keys, &principal)?;
    Ok(Json(state.db.worker_activity(client_id).await?))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        register_handler,
        heartbeat_handler,
        list_handler,
        statistics_handler,
        activity_handler
    ),
    components(schemas(RegisterClientRequest, RegisterClientResponse))
)]
struct Docs;

pub fn create_docs() -> utoipa::openapi::OpenApi {
    Docs::openapi()
}

pub fn create_router() -> Router<HostState> {
    Router::new()
        .route("/", get(list_handler))
        .route("/register", post(register_handler))
        .route("/heartbeat", post(heartbeat_handler))
        .route("/:client_id/statistics", get(statistics_handler))
        .route("/:client_id/activity", get(activity_handler))
}

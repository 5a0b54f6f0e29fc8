use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{debug_handler, Extension, Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use reyestr_db::cache::{document_key, worker_statistics_key};
use reyestr_db::{Db, RegisterDocument};
use reyestr_lib::{Classification, Document, DocumentMeta, ProgressStatus, SearchParams};

use crate::interfaces::{ErrorEnvelope, HostError, HostResult};
use crate::metrics::inc_document_registered_count;
use crate::server::auth::{require_authenticated, require_worker, Principal};
use crate::HostState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterDocumentRequest {
    pub metadata: DocumentMeta,
    pub task_id: Option<Uuid>,
    pub search_params: Option<SearchParams>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegisterDocumentResponse {
    pub system_id: Uuid,
    pub classified: bool,
    pub classification: Option<Classification>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OpenProgressRequest {
    pub task_id: Uuid,
    pub external_id: String,
    pub reg_number: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CloseProgressRequest {
    pub task_id: Uuid,
    pub external_id: String,
    pub status: ProgressStatus,
}

#[utoipa::path(post, path = "/documents/register",
    tag = "Documents",
    request_body = RegisterDocumentRequest,
    responses (
        (status = 200, description = "Document registered under a stable system id", body = RegisterDocumentResponse)
    )
)]
#[debug_handler(state = HostState)]
/// Register a downloaded document.
///
/// Registration is idempotent on the registry's external id: the first call
/// assigns a system id, repeated calls fill missing fields and never
/// overwrite stored values. Classification runs in the same transaction.
async fn register_handler(
    State(state): State<HostState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<RegisterDocumentRequest>,
) -> HostResult<Json<RegisterDocumentResponse>> {
    let worker = require_worker(&principal)?;

    if req.metadata.external_id.trim().is_empty() {
        return Err(HostError::BadRequest(
            "metadata.external_id must not be empty".to_string(),
        ));
    }

    let registered = state
        .db
        .register_document(RegisterDocument {
            meta: req.metadata,
            task_id: req.task_id,
            worker_id: Some(worker.id),
            search_params: req.search_params.map(SearchParams::normalize),
        })
        .await?;
    inc_document_registered_count();

    state
        .cache
        .invalidate(&[
            document_key(registered.system_id),
            worker_statistics_key(worker.id),
        ])
        .await;

    Ok(Json(RegisterDocumentResponse {
        system_id: registered.system_id,
        classified: registered.classified,
        classification: registered.classification,
    }))
}

#[utoipa::path(post, path = "/documents/progress/open",
    tag = "Documents",
    request_body = OpenProgressRequest,
    responses (
        (status = 200, description = "Download attempt opened"),
        (status = 404, description = "Unknown task", body = ErrorEnvelope)
    )
)]
#[debug_handler(state = HostState)]
/// Open the progress record for one (task, document) download attempt.
async fn open_progress_handler(
    State(state): State<HostState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<OpenProgressRequest>,
) -> HostResult<Json<serde_json::Value>> {
    let worker = require_worker(&principal)?;
    if req.external_id.trim().is_empty() {
        return Err(HostError::BadRequest(
            "external_id must not be empty".to_string(),
        ));
    }

    state
        .db
        .open_progress(
            req.task_id,
            &req.external_id,
            req.reg_number.as_deref(),
            worker.id,
        )
        .await?;
    Ok(Json(serde_json::json!({})))
}

#[utoipa::path(post, path = "/documents/progress/close",
    tag = "Documents",
    request_body = CloseProgressRequest,
    responses (
        (status = 200, description = "Download attempt closed"),
        (status = 404, description = "Unknown progress record", body = ErrorEnvelope)
    )
)]
#[debug_handler(state = HostState)]
/// Close a progress record with its final status.
async fn close_progress_handler(
    State(state): State<HostState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<CloseProgressRequest>,
) -> HostResult<Json<serde_json::Value>> {
    require_worker(&principal)?;
    if req.status == ProgressStatus::InProgress {
        return Err(HostError::BadRequest(
            "status must be completed or failed".to_string(),
        ));
    }

    state
        .db
        .close_progress(req.task_id, &req.external_id, req.status)
        .await?;
    Ok(Json(serde_json::json!({})))
}

#[utoipa::path(get, path = "/documents/{system_id}",
    tag = "Documents",
    params(("system_id" = Uuid, Path, description = "System-assigned document id")),
    responses (
        (status = 200, description = "The document", body = Document),
        (status = 404, description = "Unknown document", body = ErrorEnvelope)
    )
)]
#[debug_handler(state = HostState)]
/// Fetch one registered document.
async fn get_handler(
    State(state): State<HostState>,
    Extension(principal): Extension<Principal>,
    Path(system_id): Path<Uuid>,
) -> HostResult<Json<Document>> {
    require_authenticated(&state.api_keys, &principal)?;

    let key = document_key(system_id);
    if let Some(cached) = state.cache.get_json::<Document>(&key).await {
        return Ok(Json(cached));
    }

    let document = state
        .db
        .get_document(system_id)
        .await?
        .ok_or_else(|| HostError::NotFound("document".to_string()))?;

    let ttl = state.cache.ttl.documents;
    state.cache.put_json(&key, &document, ttl).await;
    Ok(Json(document))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        register_handler,
        open_progress_handler,
        close_progress_handler,
        get_handler
    ),
    components(schemas(
        RegisterDocumentRequest,
        RegisterDocumentResponse,
        OpenProgressRequest,
        CloseProgressRequest
    ))
)]
struct Docs;

pub fn create_docs() -> utoipa::openapi::OpenApi {
    Docs::openapi()
}

pub fn create_router() -> Router<HostState> {
    Router::new()
        .route("/register", post(register_handler))
        .route("/progress/open", post(open_progress_handler))
        .route("/progress/close", post(close_progress_handler))
        .route("/:system_id", get(get_handler))
}

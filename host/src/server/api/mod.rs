use axum::{
    body::HttpBody,
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{self, CorsLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};
use utoipa_swagger_ui::SwaggerUi;

use crate::interfaces::HostError;
use crate::metrics::inc_http_request_count;
use crate::HostState;

mod metrics;
pub mod v1;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Reyestr Dispatch Server API",
        version = "1.0",
        description = "Task dispatch and document registration for the court registry download fleet",
        license(name = "MIT"),
    ),
    components(schemas(crate::interfaces::ErrorEnvelope)),
    tags(
        (name = "Tasks", description = "Routes that create, dispatch and track download tasks"),
        (name = "Documents", description = "Routes that register and serve downloaded documents"),
        (name = "Clients", description = "Routes that register workers and report their liveness"),
        (name = "Health", description = "Routes that report the server health status"),
        (name = "Metrics", description = "Routes that give detailed insight into the server")
    )
)]
/// The root API struct which is generated from the `OpenApi` derive macro.
pub struct Docs;

#[must_use]
pub fn create_docs() -> utoipa::openapi::OpenApi {
    [v1::create_docs(), metrics::create_docs()]
        .into_iter()
        .fold(Docs::openapi(), |mut doc, sub_doc| {
            doc.merge(sub_doc);
            doc
        })
}

pub fn create_router(state: HostState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::ORIGIN,
            header::ACCEPT,
            header::CONTENT_TYPE,
            HeaderName::from_static(crate::server::auth::API_KEY_HEADER),
        ])
        .allow_origin(cors::Any);
    let compression = CompressionLayer::new();

    let middleware_stack = ServiceBuilder::new().layer(cors).layer(compression).layer(
        SetResponseHeaderLayer::overriding(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        ),
    );

    let trace = TraceLayer::new_for_http();

    let docs = create_docs();

    Router::new()
        .nest("/api/v1", v1::create_router(state.opts.concurrency_limit))
        // Metrics stay outside the versioned prefix so scrapers keep a
        // stable path.
        .nest("/metrics", metrics::create_router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::server::auth::api_key_auth,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            enforce_deadline,
        ))
        .layer(middleware_stack)
        .layer(middleware::from_fn(check_max_body_size))
        .layer(trace)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", docs.clone()))
        .merge(Scalar::with_url("/scalar", docs))
        .fallback(|uri: Uri| async move {
            (StatusCode::NOT_FOUND, format!("No handler found for {uri}"))
        })
        .with_state(state)
}

/// Every inbound request carries a wall-clock deadline; work past it is
/// abandoned and rolled back by dropping the handler future.
async fn enforce_deadline(State(state): State<HostState>, req: Request, next: Next) -> Response {
    inc_http_request_count();
    let deadline = std::time::Duration::from_secs(state.opts.request_deadline.max(1));
    match tokio::time::timeout(deadline, next.run(req)).await {
        Ok(response) => response,
        Err(_) => HostError::Timeout.into_response(),
    }
}

async fn check_max_body_size(req: Request, next: Next) -> Response {
    const MAX_BODY_SIZE: u64 = 1 << 20;
    let request_content_length = match req.body().size_hint().upper() {
        Some(v) => v,
        None => MAX_BODY_SIZE + 1,
    };

    if request_content_length > MAX_BODY_SIZE {
        let mut resp = Response::new(axum::body::Body::from("request too large"));
        *resp.status_mut() = StatusCode::BAD_REQUEST;
        return resp;
    }

    next.run(req).await
}

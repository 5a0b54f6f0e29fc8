use axum::Router;
use tower::ServiceBuilder;
use utoipa::OpenApi;

use crate::HostState;

pub mod clients;
pub mod documents;
pub mod health;
pub mod tasks;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Reyestr Dispatch Server API",
        version = "1.0",
        description = "Task dispatch and document registration for the court registry download fleet",
    ),
    components(
        schemas(
            reyestr_lib::Task,
            reyestr_lib::TaskStatus,
            reyestr_lib::TaskCounters,
            reyestr_lib::SearchParams,
            reyestr_lib::Worker,
            reyestr_lib::WorkerStatus,
            reyestr_lib::Document,
            reyestr_lib::Classification,
            reyestr_lib::ClassificationSource,
            reyestr_lib::TasksSummary,
            reyestr_lib::TaskIndexBucket,
            reyestr_lib::WorkerStatistics,
            reyestr_lib::WorkerActivity,
            reyestr_lib::stats::CurrentTaskActivity,
            reyestr_lib::stats::SessionStats,
            reyestr_lib::stats::LifetimeStats,
        )
    )
)]
struct Docs;

#[must_use]
pub fn create_docs() -> utoipa::openapi::OpenApi {
    [
        tasks::create_docs(),
        documents::create_docs(),
        clients::create_docs(),
        health::create_docs(),
    ]
    .into_iter()
    .fold(Docs::openapi(), |mut doc, sub_doc| {
        doc.merge(sub_doc);
        doc
    })
}

pub fn create_router(concurrency_limit: usize) -> Router<HostState> {
    Router::new()
        // Only the dispatch-heavy routes carry the concurrency limit; the
        // health probe stays reachable for insight into the system.
        .nest(
            "/tasks",
            tasks::create_router()
                .layer(ServiceBuilder::new().concurrency_limit(concurrency_limit)),
        )
        .nest(
            "/documents",
            documents::create_router()
                .layer(ServiceBuilder::new().concurrency_limit(concurrency_limit)),
        )
        .nest("/clients", clients::create_router())
        .nest("/health", health::create_router())
}

use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{get, post},
    Router,
};
use routes::{
    health::health,
    liveness::live,
    metrics::metrics,
    process::{document_status, process_document},
    readiness::ready,
};

pub mod api_state;
pub mod error;
pub mod health;
pub mod indexer;
mod routes;
pub mod sweeper;

/// Router for the producer service.
pub fn api_routes<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Body limit leaves headroom over the content cap so the 422 comes from
    // validation, not a blunt 413 at the boundary.
    let body_limit = app_state.config.max_content_size_bytes.saturating_add(64 * 1024);

    Router::new()
        .route(
            "/process/document",
            post(process_document).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/process/document/{document_id}/status", get(document_status))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ready", get(ready))
        .route("/live", get(live))
}

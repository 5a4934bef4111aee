use axum::{http::StatusCode, response::IntoResponse};

/// Prometheus text exposition of the process registry.
pub async fn metrics() -> impl IntoResponse {
    match common::metrics::render() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "metrics render failed");
            (StatusCode::INTERNAL_SERVER_ERROR, String::new()).into_response()
        }
    }
}

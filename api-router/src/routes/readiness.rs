use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::{
    api_state::ApiState,
    health::{summarize, HealthLevel},
};

/// Readiness probe: 200 only when no critical dependency is down.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    let report = summarize(state.health.probe().await);
    match report.status {
        HealthLevel::Healthy | HealthLevel::Degraded => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "checks": report.dependencies
            })),
        ),
        HealthLevel::Unhealthy => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "checks": report.dependencies
            })),
        ),
    }
}

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::{
    api_state::ApiState,
    health::{summarize, HealthLevel},
};

/// Aggregate health with a per-dependency breakdown. Unhealthy (a critical
/// dependency down) answers 503 so load balancers stop routing here.
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let report = summarize(state.health.probe().await);
    let code = match report.status {
        HealthLevel::Healthy | HealthLevel::Degraded => StatusCode::OK,
        HealthLevel::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(report))
}

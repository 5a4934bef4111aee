use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::{api_state::ApiState, error::ApiError, indexer::ProcessDocumentRequest};

#[derive(Debug, Serialize)]
pub struct ProcessDocumentResponse {
    pub success: bool,
    pub document_id: Uuid,
    pub project_id: String,
    pub status: String,
    pub status_url: String,
    pub message: String,
}

/// `POST /process/document`: synchronous skeleton index plus an enrichment
/// event. Always fast; the caller polls the status URL for the outcome.
pub async fn process_document(
    State(state): State<ApiState>,
    Json(body): Json<ProcessDocumentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let project_id = body.project_id.clone();
    let result = state.indexer.index(body).await?;

    let (status, message) = if result.skeleton_indexed {
        (
            "processing_queued",
            "document indexed; enrichment queued".to_string(),
        )
    } else {
        (
            "already_completed",
            "content already enriched; no work queued".to_string(),
        )
    };

    Ok((
        StatusCode::OK,
        Json(ProcessDocumentResponse {
            success: true,
            document_id: result.document_id,
            project_id,
            status: status.to_string(),
            status_url: result.status_url,
            message,
        }),
    ))
}

/// `GET /process/document/{document_id}/status`: the tracker's view of the
/// background enrichment. 404 for unknown ids, 503 when the tracker itself
/// is down.
pub async fn document_status(
    State(state): State<ApiState>,
    Path(document_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    match state.tracker.get(document_id).await {
        Ok(Some(status)) => Ok((StatusCode::OK, Json(status))),
        Ok(None) => Err(ApiError::NotFound(format!(
            "no status for document {document_id}"
        ))),
        Err(err) => {
            warn!(%document_id, error = %err, "status tracker unavailable");
            Err(ApiError::ServiceUnavailable(
                "status tracker unavailable".to_string(),
            ))
        }
    }
}

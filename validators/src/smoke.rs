use std::time::{Duration, Instant};

use common::{
    error::AppError,
    storage::vector::VectorClient,
    utils::{config::AppConfig, hashing::content_hash, hashing::deterministic_point_id},
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::report::Verdict;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
pub struct SmokeReport {
    pub document_id: Uuid,
    pub submitted: bool,
    pub status_reached: Option<String>,
    pub vector_present: bool,
    pub vector_dimension_ok: bool,
    pub payload_ok: bool,
    pub elapsed_ms: u64,
    pub verdict: Verdict,
}

/// The mandatory pre-deployment gate: drives one synthetic document through
/// the full path and verifies the vector point it must produce.
pub async fn run(
    config: &AppConfig,
    vector: &VectorClient,
    base_url: &str,
    timeout: Duration,
) -> Result<SmokeReport, AppError> {
    let started = Instant::now();
    let document_id = Uuid::new_v4();
    let project = format!("smoke-{}", &document_id.to_string()[..8]);
    let content = format!("def smoke_{}(): pass", document_id.simple());
    let hash = content_hash(content.as_bytes());
    let point_id = deterministic_point_id(&project, &hash);

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeouts.http_request_secs))
        .build()?;

    let body = json!({
        "document_id": document_id,
        "project_id": project,
        "title": "smoke.py",
        "content": content,
        "document_type": "code",
        "source_path": "smoke.py",
    });
    let submit_url = format!("{}/process/document", base_url.trim_end_matches('/'));
    let response = http.post(&submit_url).json(&body).send().await?;
    let submitted = response.status().is_success();
    if !submitted {
        warn!(status = %response.status(), "smoke submission rejected");
        return Ok(SmokeReport {
            document_id,
            submitted,
            status_reached: None,
            vector_present: false,
            vector_dimension_ok: false,
            payload_ok: false,
            elapsed_ms: started.elapsed().as_millis() as u64,
            verdict: Verdict::Critical,
        });
    }
    let submit_response: Value = response.json().await?;
    let status_url = submit_response
        .get("status_url")
        .and_then(Value::as_str)
        .map(str::to_string);

    // Poll until the background enrichment lands or the budget runs out.
    let mut status_reached = None;
    let mut point: Option<Value> = None;
    while started.elapsed() < timeout {
        if let Some(url) = &status_url {
            if let Ok(response) = http.get(url).send().await {
                if let Ok(status) = response.json::<Value>().await {
                    status_reached = status
                        .get("status")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                }
            }
        }
        if let Some(found) = vector.get_point(point_id).await? {
            point = Some(found);
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    let vector_present = point.is_some();
    let (vector_dimension_ok, payload_ok) = match &point {
        Some(point) => {
            let dimension = point
                .pointer("/vector")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            let payload_project = point
                .pointer("/payload/project_name")
                .and_then(Value::as_str);
            (
                dimension == config.embedding_dimensions,
                payload_project == Some(project.as_str()),
            )
        }
        None => (false, false),
    };

    let verdict = if vector_present && vector_dimension_ok && payload_ok {
        Verdict::Healthy
    } else {
        Verdict::Critical
    };

    info!(
        %document_id,
        vector_present,
        vector_dimension_ok,
        payload_ok,
        elapsed_ms = started.elapsed().as_millis() as u64,
        ?verdict,
        "smoke test finished"
    );

    Ok(SmokeReport {
        document_id,
        submitted,
        status_reached,
        vector_present,
        vector_dimension_ok,
        payload_ok,
        elapsed_ms: started.elapsed().as_millis() as u64,
        verdict,
    })
}

use common::{
    error::AppError,
    storage::{graph::GraphClient, vector::VectorClient},
    utils::{config::AppConfig, hashing::deterministic_point_id},
};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::report::Verdict;

const MIN_RATE: f64 = 0.95;

#[derive(Debug, Serialize)]
pub struct DataIntegrityReport {
    pub sampled: usize,
    pub dimension_ok: bool,
    pub vector_coverage: f64,
    pub vector_coverage_ok: bool,
    pub path_retrieval_rate: f64,
    pub path_retrieval_ok: bool,
    pub metadata_filter_ok: bool,
    pub healthy_components: usize,
    pub verdict: Verdict,
}

/// Exit policy from the spec: 0 when at least three of the four components
/// are healthy, 1 at two, 2 below that.
pub fn verdict_for(healthy_components: usize) -> Verdict {
    match healthy_components {
        n if n >= 3 => Verdict::Healthy,
        2 => Verdict::Warn,
        _ => Verdict::Critical,
    }
}

pub async fn run(
    config: &AppConfig,
    graph: &GraphClient,
    vector: &VectorClient,
    sample: usize,
) -> Result<DataIntegrityReport, AppError> {
    // Component 1: the live collection carries the configured dimension.
    let dimension_ok = match vector.collection_info().await? {
        Some(info) => {
            let live = info.config.params.vectors.size as usize;
            if live != config.embedding_dimensions {
                warn!(
                    live,
                    configured = config.embedding_dimensions,
                    "collection dimension mismatch"
                );
            }
            live == config.embedding_dimensions
        }
        None => {
            warn!("vector collection missing");
            false
        }
    };

    let documents = graph.scan_completed(sample).await?;
    let sampled = documents.len();

    // Component 2: every completed document has its deterministic point.
    let mut covered = 0_usize;
    // Component 3: points are retrievable by file path through the payload.
    let mut path_hits = 0_usize;
    for document in &documents {
        let id = deterministic_point_id(&document.project_name, &document.content_hash);
        if vector.point_exists(id).await? {
            covered += 1;
        }
        let filter = json!({
            "must": [
                { "key": "project_name", "match": { "value": document.project_name } },
                { "key": "file_path", "match": { "value": document.file_path } }
            ]
        });
        if !vector.scroll(Some(filter), 1).await?.is_empty() {
            path_hits += 1;
        }
    }

    let vector_coverage = if sampled > 0 {
        covered as f64 / sampled as f64
    } else {
        1.0
    };
    let path_retrieval_rate = if sampled > 0 {
        path_hits as f64 / sampled as f64
    } else {
        1.0
    };

    // Component 4: a document_type filter returns only matching payloads.
    let metadata_filter_ok = {
        let filter = json!({
            "must": [ { "key": "document_type", "match": { "value": "code" } } ]
        });
        let points = vector.scroll(Some(filter), 20).await?;
        points.iter().all(|point| {
            point
                .pointer("/payload/document_type")
                .and_then(serde_json::Value::as_str)
                == Some("code")
        })
    };

    let vector_coverage_ok = vector_coverage >= MIN_RATE;
    let path_retrieval_ok = path_retrieval_rate >= MIN_RATE;
    let healthy_components = [
        dimension_ok,
        vector_coverage_ok,
        path_retrieval_ok,
        metadata_filter_ok,
    ]
    .iter()
    .filter(|ok| **ok)
    .count();

    let verdict = verdict_for(healthy_components);
    info!(
        sampled,
        vector_coverage,
        path_retrieval_rate,
        healthy_components,
        ?verdict,
        "data integrity check finished"
    );

    Ok(DataIntegrityReport {
        sampled,
        dimension_ok,
        vector_coverage,
        vector_coverage_ok,
        path_retrieval_rate,
        path_retrieval_ok,
        metadata_filter_ok,
        healthy_components,
        verdict,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_policy_counts_healthy_components() {
        assert_eq!(verdict_for(4), Verdict::Healthy);
        assert_eq!(verdict_for(3), Verdict::Healthy);
        assert_eq!(verdict_for(2), Verdict::Warn);
        assert_eq!(verdict_for(1), Verdict::Critical);
        assert_eq!(verdict_for(0), Verdict::Critical);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    storage::types::document::Document,
    utils::hashing::deterministic_point_id,
};

/// Fixed payload stored alongside every vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPayload {
    pub document_id: Uuid,
    pub project_name: String,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub document_type: String,
    pub content_hash: String,
    pub quality_score: f32,
    #[serde(default)]
    pub fallback_vector: bool,
    pub enriched_at: DateTime<Utc>,
}

/// One point in the vector collection. The id is derived from
/// `(project, content_hash)` so repeated enrichment upserts in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: VectorPayload,
}

impl VectorPoint {
    pub fn for_document(
        document: &Document,
        vector: Vec<f32>,
        quality_score: f32,
        fallback_vector: bool,
    ) -> Self {
        Self {
            id: deterministic_point_id(&document.project_name, &document.content_hash),
            vector,
            payload: VectorPayload {
                document_id: document.document_id,
                project_name: document.project_name.clone(),
                file_path: document.file_path.clone(),
                language: document.language.clone(),
                document_type: document.document_type.to_string(),
                content_hash: document.content_hash.clone(),
                quality_score,
                fallback_vector,
                enriched_at: Utc::now(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::enrichment::DocumentType;

    #[test]
    fn point_id_matches_deterministic_scheme() {
        let doc = Document::new(
            Uuid::new_v4(),
            "demo",
            "cd".repeat(32),
            "a.py",
            DocumentType::Code,
            Some("python".into()),
        );
        let point = VectorPoint::for_document(&doc, vec![0.0; 4], 0.5, false);
        assert_eq!(
            point.id,
            deterministic_point_id("demo", &doc.content_hash)
        );
        assert_eq!(point.payload.document_type, "code");
        assert!(!point.payload.fallback_vector);
    }
}

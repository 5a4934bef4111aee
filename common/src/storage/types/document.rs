use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::events::enrichment::DocumentType;

/// Enrichment lifecycle of a document, stored on its `File` node. The
/// producer creates documents as `pending`; the consumer drives them to a
/// terminal state. `dlq` is terminal until a manual reprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Dlq,
}

impl fmt::Display for EnrichmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Dlq => "dlq",
        };
        f.write_str(name)
    }
}

/// A document known to the system. Identity for enrichment writes is the
/// pair `(project_name, content_hash)`; `document_id` identifies the
/// logical file across content revisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: Uuid,
    pub project_name: String,
    pub content_hash: String,
    pub file_path: String,
    pub document_type: DocumentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub indexed_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub enrichment_status: EnrichmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enriched_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment_content_hash: Option<String>,
}

impl Document {
    pub fn new(
        document_id: Uuid,
        project_name: impl Into<String>,
        content_hash: impl Into<String>,
        file_path: impl Into<String>,
        document_type: DocumentType,
        language: Option<String>,
    ) -> Self {
        Self {
            document_id,
            project_name: project_name.into(),
            content_hash: content_hash.into(),
            file_path: file_path.into(),
            document_type,
            language,
            indexed_at: Utc::now(),
            metadata: Map::new(),
            enrichment_status: EnrichmentStatus::Pending,
            enriched_at: None,
            enrichment_content_hash: None,
        }
    }

    /// Directory chain for the file path, outermost first. `src/api/mod.rs`
    /// yields `["src", "src/api"]`.
    pub fn directory_chain(&self) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = String::new();
        let path = self.file_path.trim_start_matches('/');
        let Some((dirs, _file)) = path.rsplit_once('/') else {
            return chain;
        };
        for segment in dirs.split('/').filter(|s| !s.is_empty()) {
            if current.is_empty() {
                current = segment.to_string();
            } else {
                current = format!("{current}/{segment}");
            }
            chain.push(current.clone());
        }
        chain
    }
}

/// A completed document stuck on a zero-vector fallback, with the number of
/// sweeper republishes already attempted. The first pass re-enriches
/// entities only; later passes escalate to a full re-enrichment.
#[derive(Debug, Clone)]
pub struct FallbackDocument {
    pub document: Document,
    pub reprocess_attempts: i64,
}

/// Outcome of a producer `index` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexResult {
    pub document_id: Uuid,
    pub skeleton_indexed: bool,
    pub enrichment_queued: bool,
    pub status_url: String,
}

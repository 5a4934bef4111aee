use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Code,
    Documentation,
    Configuration,
    Test,
    Other,
}

impl DocumentType {
    /// Lenient parse used at the API boundary; unknown kinds map to `Other`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "code" => Self::Code,
            "documentation" | "docs" | "doc" => Self::Documentation,
            "configuration" | "config" => Self::Configuration,
            "test" | "tests" => Self::Test,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Code => "code",
            Self::Documentation => "documentation",
            Self::Configuration => "configuration",
            Self::Test => "test",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentType {
    #[default]
    Full,
    Incremental,
    QualityOnly,
    EntitiesOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

/// Request for asynchronous enrichment of one indexed document. Keyed on
/// `document_id` so all events for a document stay on one partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentRequestEvent {
    pub document_id: Uuid,
    pub project_name: String,
    pub content_hash: String,
    pub file_path: String,
    pub document_type: DocumentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default)]
    pub enrichment_type: EnrichmentType,
    #[serde(default)]
    pub priority: Priority,
    pub correlation_id: Uuid,
    pub indexed_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub retry_count: u32,
}

impl EnrichmentRequestEvent {
    /// Copy of this request with the retry counter bumped, used when a
    /// retriable failure re-emits the event.
    pub fn next_attempt(&self) -> Self {
        let mut next = self.clone();
        next.retry_count = next.retry_count.saturating_add(1);
        next
    }

    /// Minimal request for tests and the smoke validator.
    pub fn synthetic(project: &str, file_path: &str) -> Self {
        let content = format!("synthetic content for {file_path}");
        Self {
            document_id: Uuid::new_v4(),
            project_name: project.to_string(),
            content_hash: crate::utils::hashing::content_hash(content.as_bytes()),
            file_path: file_path.to_string(),
            document_type: DocumentType::Code,
            language: Some("python".to_string()),
            enrichment_type: EnrichmentType::Full,
            priority: Priority::Normal,
            correlation_id: Uuid::new_v4(),
            indexed_at: Utc::now(),
            metadata: Map::new(),
            retry_count: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedEntity {
    pub id: String,
    pub name: String,
    pub entity_type: String,
}

/// Output of the intelligence service for one document. The embedding is
/// absent here; it is produced separately by the embedding distribution
/// layer during the vector stage.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EnrichmentResult {
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub quality_score: f32,
    #[serde(default)]
    pub complexity_score: f32,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub anti_patterns: Vec<String>,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onex_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    Success,
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentCompletedEvent {
    pub document_id: Uuid,
    pub project_name: String,
    pub content_hash: String,
    pub correlation_id: Uuid,
    pub status: CompletionStatus,
    pub stage_durations_ms: BTreeMap<String, u64>,
    pub entities_extracted: usize,
    pub vector_indexed: bool,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentFailedEvent {
    pub document_id: Uuid,
    pub project_name: String,
    pub correlation_id: Uuid,
    pub error_code: String,
    pub error_message: String,
    pub retry_count: u32,
    pub retry_allowed: bool,
    pub failed_at: DateTime<Utc>,
}

/// Tag assigned by the DLQ processor when triaging terminal failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlqClassification {
    Transient,
    DataQuality,
    ServiceDown,
    #[serde(rename = "internal_error")]
    Internal,
}

impl DlqClassification {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::DataQuality => "data_quality",
            Self::ServiceDown => "service_down",
            Self::Internal => "internal_error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub exception_type: String,
    pub exception_message: String,
    #[serde(default)]
    pub service_health: BTreeMap<String, bool>,
}

/// Terminal failure record published to the compacted DLQ topic, keyed by
/// `document_id` so only the latest failure per document is retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEvent {
    pub document_id: Uuid,
    pub failure_reason: String,
    pub failure_timestamp: DateTime<Utc>,
    pub failure_count: u32,
    pub error_code: String,
    pub retry_allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<DlqClassification>,
    pub original_event: EnrichmentRequestEvent,
    pub error_details: ErrorDetails,
}

/// Optional per-step progress notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentProgressEvent {
    pub document_id: Uuid,
    pub correlation_id: Uuid,
    pub step: String,
    pub step_status: String,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_type_parses_leniently() {
        assert_eq!(DocumentType::parse_lenient("Code"), DocumentType::Code);
        assert_eq!(
            DocumentType::parse_lenient("docs"),
            DocumentType::Documentation
        );
        assert_eq!(
            DocumentType::parse_lenient("CONFIG"),
            DocumentType::Configuration
        );
        assert_eq!(DocumentType::parse_lenient("weird"), DocumentType::Other);
    }

    #[test]
    fn next_attempt_only_bumps_retry_count() {
        let request = EnrichmentRequestEvent::synthetic("demo", "src/lib.rs");
        let retried = request.next_attempt();
        assert_eq!(retried.retry_count, 1);
        assert_eq!(retried.document_id, request.document_id);
        assert_eq!(retried.content_hash, request.content_hash);
        assert_eq!(retried.correlation_id, request.correlation_id);
    }

    #[test]
    fn request_defaults_apply_on_deserialize() {
        let raw = serde_json::json!({
            "document_id": Uuid::new_v4(),
            "project_name": "demo",
            "content_hash": "ab".repeat(32),
            "file_path": "a.py",
            "document_type": "code",
            "correlation_id": Uuid::new_v4(),
            "indexed_at": Utc::now(),
        });
        let event: EnrichmentRequestEvent = serde_json::from_value(raw).expect("deserialize");
        assert_eq!(event.enrichment_type, EnrichmentType::Full);
        assert_eq!(event.priority, Priority::Normal);
        assert_eq!(event.retry_count, 0);
    }

    #[test]
    fn dlq_classification_serializes_snake_case() {
        let json = serde_json::to_string(&DlqClassification::ServiceDown).expect("serialize");
        assert_eq!(json, "\"service_down\"");
        let json = serde_json::to_string(&DlqClassification::Internal).expect("serialize");
        assert_eq!(json, "\"internal_error\"");
    }
}

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Success,
    Skipped,
    Failed,
}

/// The six enrichment stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Validate,
    Intelligence,
    Stamp,
    Vector,
    Graph,
    Cache,
}

impl PipelineStep {
    pub const ALL: [Self; 6] = [
        Self::Validate,
        Self::Intelligence,
        Self::Stamp,
        Self::Vector,
        Self::Graph,
        Self::Cache,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Intelligence => "intelligence",
            Self::Stamp => "stamp",
            Self::Vector => "vector",
            Self::Graph => "graph",
            Self::Cache => "cache",
        }
    }
}

/// Observable state of one background enrichment, stored in the status
/// tracker for 24 hours and served by the producer's status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub document_id: Uuid,
    pub correlation_id: Uuid,
    pub status: TaskState,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<Value>,
    pub pipeline_steps: BTreeMap<String, StepStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities_extracted: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_indexed: Option<bool>,
}

impl TaskStatus {
    pub fn started(document_id: Uuid, correlation_id: Uuid) -> Self {
        let pipeline_steps = PipelineStep::ALL
            .iter()
            .map(|step| (step.as_str().to_string(), StepStatus::Pending))
            .collect();

        Self {
            document_id,
            correlation_id,
            status: TaskState::Running,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
            error_details: None,
            pipeline_steps,
            entities_extracted: None,
            vector_indexed: None,
        }
    }

    pub fn set_step(&mut self, step: PipelineStep, status: StepStatus) {
        self.pipeline_steps
            .insert(step.as_str().to_string(), status);
    }

    pub fn finish_success(&mut self, entities_extracted: usize, vector_indexed: bool) {
        self.status = TaskState::Success;
        self.completed_at = Some(Utc::now());
        self.entities_extracted = Some(entities_extracted);
        self.vector_indexed = Some(vector_indexed);
    }

    pub fn finish_failure(&mut self, message: String, details: Option<Value>) {
        self.status = TaskState::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(message);
        self.error_details = details;
    }
}

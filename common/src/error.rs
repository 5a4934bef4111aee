use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

use crate::events::enrichment::DlqClassification;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
    #[error("Graph error: {0}")]
    Graph(#[from] neo4rs::Error),
    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),
    #[error("Embedding backend error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Circuit open for {0}")]
    CircuitOpen(String),
    #[error("Upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),
    #[error("Enrichment processing error: {0}")]
    Processing(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Whether the enrichment pipeline may retry after this failure.
    ///
    /// Timeouts, transport failures, and 5xx responses are transient;
    /// validation, 4xx, and integrity failures are not. An open circuit is
    /// terminal for the attempt and routes straight to the dead letter queue.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Kafka(_)
            | Self::Graph(_)
            | Self::Cache(_)
            | Self::OpenAI(_)
            | Self::Timeout(_)
            | Self::Processing(_) => true,
            Self::Reqwest(err) => {
                err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
            }
            Self::Upstream { status, .. } => *status >= 500,
            Self::Serialization(_)
            | Self::Io(_)
            | Self::Config(_)
            | Self::Join(_)
            | Self::Anyhow(_)
            | Self::NotFound(_)
            | Self::Validation(_)
            | Self::CircuitOpen(_)
            | Self::DataIntegrity(_)
            | Self::InternalError(_) => false,
        }
    }

    /// Dead letter classification for terminal failures.
    pub fn dlq_classification(&self) -> DlqClassification {
        match self {
            Self::Validation(_) | Self::Serialization(_) | Self::DataIntegrity(_) => {
                DlqClassification::DataQuality
            }
            Self::CircuitOpen(_) => DlqClassification::ServiceDown,
            Self::InternalError(_) | Self::Join(_) => DlqClassification::Internal,
            _ if self.is_retriable() => DlqClassification::Transient,
            _ => DlqClassification::Internal,
        }
    }

    /// Short stable code used in failed events and DLQ records.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "INVALID_INPUT",
            Self::Serialization(_) => "SCHEMA_ERROR",
            Self::DataIntegrity(_) => "DATA_INTEGRITY",
            Self::Timeout(_) => "TIMEOUT",
            Self::CircuitOpen(_) => "SERVICE_DOWN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Upstream { status, .. } if *status >= 500 => "UPSTREAM_5XX",
            Self::Upstream { .. } => "UPSTREAM_4XX",
            Self::InternalError(_) | Self::Join(_) => "INTERNAL_ERROR",
            _ => "TRANSIENT",
        }
    }

    /// The concrete variant name, recorded as `exception_type` in DLQ details.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Kafka(_) => "Kafka",
            Self::Graph(_) => "Graph",
            Self::Cache(_) => "Cache",
            Self::OpenAI(_) => "OpenAI",
            Self::Reqwest(_) => "Reqwest",
            Self::Serialization(_) => "Serialization",
            Self::Io(_) => "Io",
            Self::Config(_) => "Config",
            Self::Join(_) => "Join",
            Self::Anyhow(_) => "Anyhow",
            Self::NotFound(_) => "NotFound",
            Self::Validation(_) => "Validation",
            Self::Timeout(_) => "Timeout",
            Self::CircuitOpen(_) => "CircuitOpen",
            Self::Upstream { .. } => "Upstream",
            Self::DataIntegrity(_) => "DataIntegrity",
            Self::Processing(_) => "Processing",
            Self::InternalError(_) => "InternalError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_not_retriable() {
        let err = AppError::Validation("bad payload".into());
        assert!(!err.is_retriable());
        assert_eq!(err.error_code(), "INVALID_INPUT");
        assert!(matches!(
            err.dlq_classification(),
            DlqClassification::DataQuality
        ));
    }

    #[test]
    fn upstream_status_splits_retriability() {
        let server = AppError::Upstream {
            status: 503,
            message: "unavailable".into(),
        };
        let client = AppError::Upstream {
            status: 422,
            message: "rejected".into(),
        };
        assert!(server.is_retriable());
        assert!(!client.is_retriable());
    }

    #[test]
    fn open_circuit_classifies_as_service_down() {
        let err = AppError::CircuitOpen("intelligence".into());
        assert!(!err.is_retriable());
        assert!(matches!(
            err.dlq_classification(),
            DlqClassification::ServiceDown
        ));
    }

    #[test]
    fn timeouts_stay_transient() {
        let err = AppError::Timeout("pipeline deadline exceeded".into());
        assert!(err.is_retriable());
        assert!(matches!(
            err.dlq_classification(),
            DlqClassification::Transient
        ));
    }
}

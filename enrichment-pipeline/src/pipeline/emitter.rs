use async_trait::async_trait;
use common::{
    error::AppError,
    events::enrichment::{
        DlqEvent, EnrichmentCompletedEvent, EnrichmentFailedEvent, EnrichmentProgressEvent,
        EnrichmentRequestEvent,
    },
    kafka::publisher::{EnrichmentQueue, EventPublisher},
};

/// Outbound event seam for the pipeline. The production implementation is
/// the Kafka publisher; tests capture emissions in memory.
#[async_trait]
pub trait PipelineEmitter: Send + Sync {
    async fn emit_retry(&self, request: &EnrichmentRequestEvent) -> Result<(), AppError>;
    async fn emit_completed(&self, event: &EnrichmentCompletedEvent) -> Result<(), AppError>;
    async fn emit_failed(&self, event: &EnrichmentFailedEvent) -> Result<(), AppError>;
    async fn emit_dlq(&self, event: &DlqEvent) -> Result<(), AppError>;
    async fn emit_progress(&self, event: &EnrichmentProgressEvent) -> Result<(), AppError>;
}

#[async_trait]
impl PipelineEmitter for EventPublisher {
    async fn emit_retry(&self, request: &EnrichmentRequestEvent) -> Result<(), AppError> {
        self.publish_request(request).await
    }

    async fn emit_completed(&self, event: &EnrichmentCompletedEvent) -> Result<(), AppError> {
        self.publish_completed(event).await
    }

    async fn emit_failed(&self, event: &EnrichmentFailedEvent) -> Result<(), AppError> {
        self.publish_failed(event).await
    }

    async fn emit_dlq(&self, event: &DlqEvent) -> Result<(), AppError> {
        self.publish_dlq(event).await
    }

    async fn emit_progress(&self, event: &EnrichmentProgressEvent) -> Result<(), AppError> {
        self.publish_progress(event).await
    }
}

use std::sync::Arc;
use std::time::Duration;

use rdkafka::{
    consumer::{CommitMode, Consumer, StreamConsumer},
    message::Message,
};
use tracing::{error, info, warn};

use common::{
    error::AppError,
    events::{
        enrichment::{DlqClassification, DlqEvent},
        EventEnvelope,
    },
    kafka::{consumer_config, publisher::EventPublisher},
    utils::config::AppConfig,
};

/// Summary of one reprocessing pass over the DLQ.
#[derive(Debug, Default, Clone)]
pub struct ReprocessReport {
    pub republished: usize,
    pub data_quality: usize,
    pub internal: usize,
}

/// Triage for dead-lettered events. Transient and service-down failures can
/// be republished once the downstream recovers; data-quality and internal
/// failures need a human and only raise signals.
pub struct DlqProcessor {
    consumer: StreamConsumer,
    publisher: Arc<EventPublisher>,
    enrichment_topic: String,
}

impl DlqProcessor {
    pub fn new(config: &AppConfig, publisher: Arc<EventPublisher>) -> Result<Self, AppError> {
        let dlq_topic = config.dlq_topic();
        let mut client = consumer_config(config);
        client.set("group.id", format!("{}-dlq", config.kafka_group_id));
        let consumer: StreamConsumer = client.create()?;
        consumer.subscribe(&[dlq_topic.as_str()])?;

        info!(topic = dlq_topic, "dlq processor subscribed");

        Ok(Self {
            consumer,
            publisher,
            enrichment_topic: config.enrichment_topic(),
        })
    }

    /// Classification stored at publish time, falling back to the error
    /// code for records written by older producers.
    pub fn classify(event: &DlqEvent) -> DlqClassification {
        if let Some(classification) = event.classification {
            return classification;
        }
        match event.error_code.as_str() {
            "INVALID_INPUT" | "SCHEMA_ERROR" | "DATA_INTEGRITY" => DlqClassification::DataQuality,
            "SERVICE_DOWN" => DlqClassification::ServiceDown,
            "INTERNAL_ERROR" => DlqClassification::Internal,
            _ => DlqClassification::Transient,
        }
    }

    /// Pulls dead-lettered events until the batch fills or the topic stays
    /// quiet for `idle`.
    pub async fn drain_batch(&self, max: usize, idle: Duration) -> Result<Vec<DlqEvent>, AppError> {
        let mut batch = Vec::new();
        while batch.len() < max {
            let message = match tokio::time::timeout(idle, self.consumer.recv()).await {
                Ok(Ok(message)) => message,
                Ok(Err(err)) => {
                    warn!(error = %err, "dlq receive error");
                    break;
                }
                Err(_) => break,
            };

            let Some(payload) = message.payload() else {
                continue;
            };
            match EventEnvelope::decode(payload).and_then(|e| e.payload_as::<DlqEvent>()) {
                Ok(event) => batch.push(event),
                Err(err) => {
                    error!(
                        offset = message.offset(),
                        error = %err,
                        "undecodable dlq record"
                    );
                }
            }
            self.consumer.commit_message(&message, CommitMode::Async)?;
        }
        Ok(batch)
    }

    /// Republishes recoverable failures with a fresh retry budget and
    /// raises signals for the rest.
    pub async fn reprocess(&self, batch: Vec<DlqEvent>) -> Result<ReprocessReport, AppError> {
        let mut report = ReprocessReport::default();

        for event in batch {
            match Self::classify(&event) {
                DlqClassification::Transient | DlqClassification::ServiceDown => {
                    let mut request = event.original_event.clone();
                    request.retry_count = 0;
                    self.publisher
                        .publish_request_to(&self.enrichment_topic, &request)
                        .await?;
                    report.republished += 1;
                    info!(
                        document_id = %event.document_id,
                        reason = %event.failure_reason,
                        "dlq event republished"
                    );
                }
                DlqClassification::DataQuality => {
                    report.data_quality += 1;
                    error!(
                        document_id = %event.document_id,
                        error_code = %event.error_code,
                        reason = %event.failure_reason,
                        "dlq event needs data correction; not republished"
                    );
                }
                DlqClassification::Internal => {
                    report.internal += 1;
                    error!(
                        document_id = %event.document_id,
                        exception = %event.error_details.exception_type,
                        reason = %event.failure_reason,
                        "dlq event hit an internal error; not republished"
                    );
                }
            }
        }

        info!(
            republished = report.republished,
            data_quality = report.data_quality,
            internal = report.internal,
            "dlq reprocess pass finished"
        );
        Ok(report)
    }
}

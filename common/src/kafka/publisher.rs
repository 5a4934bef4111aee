use std::time::Duration;

use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use tracing::{debug, error};
use uuid::Uuid;

use crate::{
    error::AppError,
    events::{
        enrichment::{
            DlqEvent, EnrichmentCompletedEvent, EnrichmentFailedEvent, EnrichmentProgressEvent,
            EnrichmentRequestEvent,
        },
        EventEnvelope, EventKind, EventSource,
    },
    kafka::producer_config,
    metrics,
    utils::config::AppConfig,
};

/// Resolved topic names for one process.
#[derive(Debug, Clone)]
pub struct TopicSet {
    pub enrichment: String,
    pub dlq: String,
    pub completed: String,
    pub progress: Option<String>,
}

impl TopicSet {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            enrichment: config.enrichment_topic(),
            dlq: config.dlq_topic(),
            completed: config.completed_topic(),
            progress: config.progress_topic(),
        }
    }
}

/// Seam between the producer/pipeline and Kafka, so tests can capture
/// emitted requests without a broker.
#[async_trait]
pub trait EnrichmentQueue: Send + Sync {
    async fn publish_request(&self, event: &EnrichmentRequestEvent) -> Result<(), AppError>;
}

/// Publishes enveloped events. Requests and DLQ records are keyed by
/// `document_id` to preserve per-document ordering and DLQ compaction.
#[derive(Clone)]
pub struct EventPublisher {
    producer: FutureProducer,
    topics: TopicSet,
    source: EventSource,
    delivery_timeout: Duration,
}

impl EventPublisher {
    pub fn new(config: &AppConfig, source: EventSource) -> Result<Self, AppError> {
        let producer: FutureProducer = producer_config(config).create()?;
        Ok(Self {
            producer,
            topics: TopicSet::from_config(config),
            source,
            delivery_timeout: Duration::from_secs(config.timeouts.kafka_delivery_secs),
        })
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    async fn publish(
        &self,
        topic: &str,
        key: &str,
        envelope: &EventEnvelope,
    ) -> Result<(), AppError> {
        let payload = envelope.encode()?;
        let record = FutureRecord::to(topic).key(key).payload(&payload);

        match self
            .producer
            .send(record, Timeout::After(self.delivery_timeout))
            .await
        {
            Ok((partition, offset)) => {
                debug!(
                    topic,
                    key,
                    partition,
                    offset,
                    event = ?envelope.event_type,
                    correlation_id = %envelope.correlation_id,
                    "event published"
                );
                Ok(())
            }
            Err((err, _message)) => {
                error!(topic, key, error = %err, "event publish failed");
                Err(AppError::Kafka(err))
            }
        }
    }

    pub async fn publish_completed(
        &self,
        event: &EnrichmentCompletedEvent,
    ) -> Result<(), AppError> {
        let envelope = EventEnvelope::new(
            EventKind::EnrichmentCompleted,
            self.source.clone(),
            event.correlation_id,
            event,
        )?;
        self.publish(
            &self.topics.completed,
            &event.document_id.to_string(),
            &envelope,
        )
        .await
    }

    pub async fn publish_failed(&self, event: &EnrichmentFailedEvent) -> Result<(), AppError> {
        let envelope = EventEnvelope::new(
            EventKind::EnrichmentFailed,
            self.source.clone(),
            event.correlation_id,
            event,
        )?;
        self.publish(
            &self.topics.completed,
            &event.document_id.to_string(),
            &envelope,
        )
        .await
    }

    pub async fn publish_dlq(&self, event: &DlqEvent) -> Result<(), AppError> {
        let envelope = EventEnvelope::new(
            EventKind::EnrichmentDeadLettered,
            self.source.clone(),
            event.original_event.correlation_id,
            event,
        )?;
        let classification = event
            .classification
            .map_or("unclassified", |c| c.as_str());
        metrics::DLQ_EVENTS.with_label_values(&[classification]).inc();
        self.publish(&self.topics.dlq, &event.document_id.to_string(), &envelope)
            .await
    }

    /// Progress events are optional; absent topic means a no-op.
    pub async fn publish_progress(
        &self,
        event: &EnrichmentProgressEvent,
    ) -> Result<(), AppError> {
        let Some(topic) = self.topics.progress.as_deref() else {
            return Ok(());
        };
        let envelope = EventEnvelope::new(
            EventKind::EnrichmentProgress,
            self.source.clone(),
            event.correlation_id,
            event,
        )?;
        self.publish(topic, &event.document_id.to_string(), &envelope)
            .await
    }

    /// Re-emits a request to an explicit topic (DLQ reprocessing path).
    pub async fn publish_request_to(
        &self,
        topic: &str,
        event: &EnrichmentRequestEvent,
    ) -> Result<(), AppError> {
        let envelope = EventEnvelope::new(
            EventKind::EnrichmentRequested,
            self.source.clone(),
            event.correlation_id,
            event,
        )?;
        self.publish(topic, &event.document_id.to_string(), &envelope)
            .await
    }

    /// Broker reachability probe for `/health`.
    pub async fn ping(&self) -> Result<(), AppError> {
        use rdkafka::producer::Producer;
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, Duration::from_secs(3))
                .map(|_| ())
        })
        .await?
        .map_err(AppError::Kafka)
    }
}

#[async_trait]
impl EnrichmentQueue for EventPublisher {
    async fn publish_request(&self, event: &EnrichmentRequestEvent) -> Result<(), AppError> {
        let envelope = EventEnvelope::new(
            EventKind::EnrichmentRequested,
            self.source.clone(),
            event.correlation_id,
            event,
        )?;
        let result = self
            .publish(
                &self.topics.enrichment,
                &event.document_id.to_string(),
                &envelope,
            )
            .await;
        if result.is_err() {
            metrics::ENRICHMENT_PUBLISH_ERRORS.inc();
        }
        result
    }
}

/// In-memory queue used by tests and the smoke validator's dry-run mode.
#[derive(Default)]
pub struct RecordingQueue {
    pub published: tokio::sync::Mutex<Vec<EnrichmentRequestEvent>>,
}

impl RecordingQueue {
    pub async fn published_for(&self, document_id: Uuid) -> Vec<EnrichmentRequestEvent> {
        self.published
            .lock()
            .await
            .iter()
            .filter(|e| e.document_id == document_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EnrichmentQueue for RecordingQueue {
    async fn publish_request(&self, event: &EnrichmentRequestEvent) -> Result<(), AppError> {
        self.published.lock().await.push(event.clone());
        Ok(())
    }
}

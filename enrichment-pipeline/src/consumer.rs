use dashmap::DashMap;
use rdkafka::{
    consumer::{CommitMode, Consumer, StreamConsumer},
    message::Message,
    Offset, TopicPartitionList,
};
use tracing::{debug, error, info, warn};

use common::{
    error::AppError,
    events::{enrichment::EnrichmentRequestEvent, EventEnvelope},
    kafka::consumer_config,
    metrics,
    utils::config::AppConfig,
};

/// One event pulled from the enrichment topic, with the coordinates needed
/// to commit it after a terminal outcome.
#[derive(Debug)]
pub struct ConsumedEvent {
    pub request: EnrichmentRequestEvent,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug)]
pub enum Consumed {
    Event(Box<ConsumedEvent>),
    /// Undecodable payload: logged and committed so it cannot wedge the
    /// partition.
    Malformed {
        partition: i32,
        offset: i64,
    },
}

/// Manual-commit subscriber for the enrichment topic. Offsets advance only
/// when a task reaches a terminal state; processing is at-least-once and
/// relies on the idempotent sinks.
pub struct EnrichmentConsumer {
    consumer: StreamConsumer,
    topic: String,
    committed: DashMap<i32, i64>,
}

impl EnrichmentConsumer {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let topic = config.enrichment_topic();
        let consumer: StreamConsumer = consumer_config(config).create()?;
        consumer.subscribe(&[topic.as_str()])?;

        info!(
            topic,
            group = %config.kafka_group_id,
            brokers = %config.kafka_bootstrap_servers,
            "enrichment consumer subscribed"
        );

        Ok(Self {
            consumer,
            topic,
            committed: DashMap::new(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn recv(&self) -> Result<Consumed, AppError> {
        let message = self.consumer.recv().await?;
        let partition = message.partition();
        let offset = message.offset();

        let Some(payload) = message.payload() else {
            warn!(partition, offset, "empty message payload");
            return Ok(Consumed::Malformed { partition, offset });
        };

        let envelope = match EventEnvelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(partition, offset, error = %err, "undecodable event envelope");
                return Ok(Consumed::Malformed { partition, offset });
            }
        };

        let request: EnrichmentRequestEvent = match envelope.payload_as() {
            Ok(request) => request,
            Err(err) => {
                error!(
                    partition,
                    offset,
                    correlation_id = %envelope.correlation_id,
                    error = %err,
                    "event payload does not match the enrichment request schema"
                );
                return Ok(Consumed::Malformed { partition, offset });
            }
        };

        metrics::EVENTS_CONSUMED.inc();
        debug!(
            partition,
            offset,
            document_id = %request.document_id,
            correlation_id = %request.correlation_id,
            retry_count = request.retry_count,
            "event received"
        );

        Ok(Consumed::Event(Box::new(ConsumedEvent {
            request,
            partition,
            offset,
        })))
    }

    /// Commits `offset + 1` for the partition, keeping the stored position
    /// monotonic across concurrently finishing tasks. A commit that loses
    /// the race only widens the at-least-once redelivery window.
    pub fn commit_terminal(&self, partition: i32, offset: i64) -> Result<(), AppError> {
        let next = offset.saturating_add(1);
        let mut entry = self.committed.entry(partition).or_insert(next);
        if *entry < next {
            *entry = next;
        }
        let target = *entry;
        drop(entry);

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&self.topic, partition, Offset::Offset(target))?;
        self.consumer.commit(&tpl, CommitMode::Async)?;
        debug!(partition, offset = target, "offset committed");
        Ok(())
    }
}

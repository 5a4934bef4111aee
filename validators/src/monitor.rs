use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::{graph::GraphClient, vector::VectorClient},
    utils::config::AppConfig,
};
use rdkafka::consumer::{BaseConsumer, Consumer};
use serde::Serialize;
use tracing::{info, warn};

/// One monitor observation. Offset totals let the operator derive topic
/// rates between samples; dependency booleans feed alerting.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSample {
    pub at: DateTime<Utc>,
    pub enrichment_topic_end_offset: Option<i64>,
    pub dlq_topic_end_offset: Option<i64>,
    pub graph_files: Option<i64>,
    pub vector_points: Option<u64>,
    pub graph_ok: bool,
    pub vector_ok: bool,
    pub kafka_ok: bool,
}

fn topic_end_offset(config: &AppConfig, topic: &str) -> Result<i64, AppError> {
    let consumer: BaseConsumer = {
        let mut client = common::kafka::consumer_config(config);
        client.set("group.id", format!("{}-monitor", config.kafka_group_id));
        client.create()?
    };
    let timeout = Duration::from_secs(5);
    let metadata = consumer.fetch_metadata(Some(topic), timeout)?;
    let mut total = 0_i64;
    for topic_metadata in metadata.topics() {
        for partition in topic_metadata.partitions() {
            let (_low, high) = consumer.fetch_watermarks(topic, partition.id(), timeout)?;
            total = total.saturating_add(high);
        }
    }
    Ok(total)
}

pub async fn sample(
    config: &AppConfig,
    graph: &GraphClient,
    vector: &VectorClient,
) -> MonitorSample {
    let enrichment_topic = config.enrichment_topic();
    let dlq_topic = config.dlq_topic();

    let kafka_config = config.clone();
    let offsets = tokio::task::spawn_blocking(move || {
        let enrichment = topic_end_offset(&kafka_config, &enrichment_topic);
        let dlq = topic_end_offset(&kafka_config, &dlq_topic);
        (enrichment, dlq)
    })
    .await;

    let (enrichment_offset, dlq_offset, kafka_ok) = match offsets {
        Ok((Ok(enrichment), Ok(dlq))) => (Some(enrichment), Some(dlq), true),
        Ok((enrichment, dlq)) => {
            if let Err(err) = &enrichment {
                warn!(error = %err, "enrichment topic watermark fetch failed");
            }
            if let Err(err) = &dlq {
                warn!(error = %err, "dlq topic watermark fetch failed");
            }
            (enrichment.ok(), dlq.ok(), false)
        }
        Err(err) => {
            warn!(error = %err, "watermark task failed");
            (None, None, false)
        }
    };

    let graph_files = match graph.file_count().await {
        Ok(count) => Some(count),
        Err(err) => {
            warn!(error = %err, "graph sample failed");
            None
        }
    };
    let vector_points = match vector.point_count().await {
        Ok(count) => Some(count),
        Err(err) => {
            warn!(error = %err, "vector sample failed");
            None
        }
    };

    MonitorSample {
        at: Utc::now(),
        enrichment_topic_end_offset: enrichment_offset,
        dlq_topic_end_offset: dlq_offset,
        graph_files,
        vector_points,
        graph_ok: graph_files.is_some(),
        vector_ok: vector_points.is_some(),
        kafka_ok,
    }
}

/// Samples at the configured interval, logging each observation and
/// optionally streaming it to a webhook. Bounded by `iterations` when set.
pub async fn run(
    config: &AppConfig,
    graph: &GraphClient,
    vector: &VectorClient,
    interval: Duration,
    iterations: Option<u64>,
    webhook: Option<String>,
) -> Result<(), AppError> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeouts.http_request_secs))
        .build()?;

    let mut taken = 0_u64;
    loop {
        let observation = sample(config, graph, vector).await;
        info!(
            enrichment_end = observation.enrichment_topic_end_offset,
            dlq_end = observation.dlq_topic_end_offset,
            files = observation.graph_files,
            points = observation.vector_points,
            kafka_ok = observation.kafka_ok,
            "monitor sample"
        );

        if let Some(url) = &webhook {
            if let Err(err) = http.post(url).json(&observation).send().await {
                warn!(error = %err, "webhook push failed");
            }
        }

        taken += 1;
        if iterations.is_some_and(|max| taken >= max) {
            return Ok(());
        }
        tokio::time::sleep(interval).await;
    }
}

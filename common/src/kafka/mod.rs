pub mod publisher;

use rdkafka::ClientConfig;

use crate::utils::config::AppConfig;

/// Consumer configuration: manual commits only, offsets advanced when a
/// task reaches a terminal state. A crashed worker re-delivers in-flight
/// events, which the idempotent sinks absorb.
pub fn consumer_config(config: &AppConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", &config.kafka_bootstrap_servers)
        .set("group.id", &config.kafka_group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .set("session.timeout.ms", "6000")
        .set("max.poll.interval.ms", "300000")
        .set(
            "max.partition.fetch.bytes",
            (config.max_content_size_bytes.saturating_mul(2)).to_string(),
        );
    client
}

pub fn producer_config(config: &AppConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", &config.kafka_bootstrap_servers)
        .set("compression.type", "snappy")
        .set(
            "message.timeout.ms",
            (config.timeouts.kafka_delivery_secs * 1000).to_string(),
        )
        .set("enable.idempotence", "true");
    client
}

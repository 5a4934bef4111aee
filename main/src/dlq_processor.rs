use std::sync::Arc;
use std::time::Duration;

use common::{events::EventSource, kafka::publisher::EventPublisher, utils::config::get_config};
use enrichment_pipeline::dlq::DlqProcessor;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// One manual reprocessing pass over the DLQ: drain a batch, republish the
/// recoverable failures, report the rest. Run it after the broken
/// downstream recovers.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let source = EventSource::new(
        format!("{}-dlq-processor", config.service_name),
        format!("dlq-{}", config.instance_id),
    );
    let publisher = Arc::new(EventPublisher::new(&config, source)?);
    let processor = DlqProcessor::new(&config, publisher)?;

    let batch = processor
        .drain_batch(config.kafka_max_poll_records as usize, Duration::from_secs(5))
        .await?;
    if batch.is_empty() {
        info!("dlq empty; nothing to reprocess");
        return Ok(());
    }

    let report = processor.reprocess(batch).await?;
    println!("{}", serde_json::to_string_pretty(&serde_json::json!({
        "republished": report.republished,
        "data_quality": report.data_quality,
        "internal": report.internal,
    }))?);

    Ok(())
}

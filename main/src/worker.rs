use std::sync::Arc;
use std::time::Duration;

use common::{
    events::EventSource,
    kafka::publisher::EventPublisher,
    storage::{cache::CacheClient, graph::GraphClient, status::StatusTracker, vector::VectorClient},
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use enrichment_pipeline::{
    consumer::EnrichmentConsumer,
    embedding_pool::EmbeddingPool,
    intelligence::IntelligenceClient,
    pipeline::{DefaultPipelineServices, EnrichmentPipeline, PipelineConfig, PipelineServices},
    resilience::breaker::BreakerRegistry,
    run_consumer_loop,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let embedding_provider = Arc::new(EmbeddingProvider::from_config(&config));
    let embedding_pool = EmbeddingPool::new(Arc::clone(&embedding_provider), &config);

    // Dimension checks are startup-fatal: a consumer writing wrong-sized
    // vectors would poison the collection silently.
    let dimension = embedding_pool.validate_dimension().await?;
    info!(
        model = embedding_provider.model(),
        dimension,
        endpoint_instance = config.instance_id,
        "embedding backend validated"
    );

    let vector = VectorClient::new(&config)?;
    vector.ensure_collection(dimension).await?;

    let graph = GraphClient::connect(&config).await?;
    let cache = match CacheClient::connect(&config.redis_url).await {
        Ok(cache) => Some(cache),
        Err(err) => {
            warn!(error = %err, "cache unreachable; cache-warm stage will be skipped");
            None
        }
    };
    let tracker =
        StatusTracker::connect(&config.redis_url, Duration::from_secs(config.status_ttl_secs))
            .await;

    let breakers = BreakerRegistry::new(
        config.circuit_breaker_failure_threshold,
        Duration::from_secs(config.circuit_breaker_recovery_timeout_secs),
    );
    let services = DefaultPipelineServices::new(
        IntelligenceClient::new(&config)?,
        embedding_pool,
        graph,
        vector,
        cache,
        breakers,
    );

    let source = EventSource::new(
        format!("{}-worker", config.service_name),
        format!("worker-{}", config.instance_id),
    );
    let publisher = Arc::new(EventPublisher::new(&config, source)?);

    let pipeline = Arc::new(EnrichmentPipeline::new(
        PipelineConfig::from_app_config(&config),
        Arc::new(services) as Arc<dyn PipelineServices>,
        tracker,
        publisher,
    ));

    let consumer = Arc::new(EnrichmentConsumer::new(&config)?);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown_tx.send(true).ok();
        }
    });

    run_consumer_loop(consumer, pipeline, &config, shutdown_rx).await?;
    Ok(())
}

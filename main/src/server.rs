use std::sync::Arc;
use std::time::Duration;

use api_router::{
    api_routes,
    api_state::ApiState,
    health::{DependencyStatus, HealthCheck},
    indexer::{DocumentIndexer, InlineEnricher},
    sweeper::run_sweeper_loop,
};
use async_trait::async_trait;
use common::{
    error::AppError,
    events::{enrichment::EnrichmentRequestEvent, EventSource},
    kafka::publisher::{EnrichmentQueue, EventPublisher},
    storage::{
        cache::CacheClient, graph::GraphClient, graph::SkeletonStore, status::StatusTracker,
        vector::VectorClient,
    },
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use enrichment_pipeline::{
    embedding_pool::EmbeddingPool,
    intelligence::IntelligenceClient,
    pipeline::{DefaultPipelineServices, EnrichmentPipeline, PipelineConfig, PipelineServices},
    resilience::breaker::BreakerRegistry,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Synchronous enrichment for projects outside the async rollout: the same
/// pipeline, invoked inline from the request path.
struct InlinePipeline(Arc<EnrichmentPipeline>);

#[async_trait]
impl InlineEnricher for InlinePipeline {
    async fn enrich_now(&self, request: &EnrichmentRequestEvent) -> Result<(), AppError> {
        self.0.process_event(request.clone()).await.map(|_| ())
    }
}

struct ProducerHealth {
    publisher: Arc<EventPublisher>,
    graph: GraphClient,
    vector: VectorClient,
    cache: Option<CacheClient>,
}

#[async_trait]
impl HealthCheck for ProducerHealth {
    async fn probe(&self) -> Vec<DependencyStatus> {
        let mut statuses = Vec::new();

        statuses.push(match self.publisher.ping().await {
            Ok(()) => DependencyStatus {
                name: "kafka",
                critical: true,
                healthy: true,
                detail: String::new(),
            },
            Err(err) => DependencyStatus {
                name: "kafka",
                critical: true,
                healthy: false,
                detail: err.to_string(),
            },
        });

        statuses.push(match self.graph.ping().await {
            Ok(()) => DependencyStatus {
                name: "graph",
                critical: true,
                healthy: true,
                detail: String::new(),
            },
            Err(err) => DependencyStatus {
                name: "graph",
                critical: true,
                healthy: false,
                detail: err.to_string(),
            },
        });

        statuses.push(match self.vector.ping().await {
            Ok(()) => DependencyStatus {
                name: "vector",
                critical: true,
                healthy: true,
                detail: String::new(),
            },
            Err(err) => DependencyStatus {
                name: "vector",
                critical: true,
                healthy: false,
                detail: err.to_string(),
            },
        });

        match &self.cache {
            Some(cache) => statuses.push(match cache.ping().await {
                Ok(()) => DependencyStatus {
                    name: "cache",
                    critical: false,
                    healthy: true,
                    detail: String::new(),
                },
                Err(err) => DependencyStatus {
                    name: "cache",
                    critical: false,
                    healthy: false,
                    detail: err.to_string(),
                },
            }),
            None => statuses.push(DependencyStatus {
                name: "cache",
                critical: false,
                healthy: false,
                detail: "not connected".into(),
            }),
        }

        statuses
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let source = EventSource::new(
        format!("{}-producer", config.service_name),
        format!("producer-{}", config.instance_id),
    );
    let publisher = Arc::new(EventPublisher::new(&config, source)?);
    let graph = GraphClient::connect(&config).await?;
    let vector = VectorClient::new(&config)?;
    let cache = match CacheClient::connect(&config.redis_url).await {
        Ok(cache) => Some(cache),
        Err(err) => {
            warn!(error = %err, "cache unreachable; status tracking degrades to in-memory");
            None
        }
    };
    let tracker =
        StatusTracker::connect(&config.redis_url, Duration::from_secs(config.status_ttl_secs))
            .await;

    // The inline pipeline serves projects the async rollout excludes.
    let embedding_provider = Arc::new(EmbeddingProvider::from_config(&config));
    let breakers = BreakerRegistry::new(
        config.circuit_breaker_failure_threshold,
        Duration::from_secs(config.circuit_breaker_recovery_timeout_secs),
    );
    let services = DefaultPipelineServices::new(
        IntelligenceClient::new(&config)?,
        EmbeddingPool::new(embedding_provider, &config),
        graph.clone(),
        vector.clone(),
        cache.clone(),
        breakers,
    );
    let inline_pipeline = Arc::new(EnrichmentPipeline::new(
        PipelineConfig::from_app_config(&config),
        Arc::new(services) as Arc<dyn PipelineServices>,
        tracker.clone(),
        Arc::clone(&publisher) as Arc<dyn PipelineEmitter>,
    ));

    let graph = Arc::new(graph);
    let indexer = Arc::new(DocumentIndexer::new(
        config.clone(),
        Arc::clone(&graph) as Arc<dyn SkeletonStore>,
        Arc::clone(&publisher) as Arc<dyn EnrichmentQueue>,
        Some(Arc::new(InlinePipeline(inline_pipeline))),
    ));

    let health = Arc::new(ProducerHealth {
        publisher: Arc::clone(&publisher),
        graph: graph.as_ref().clone(),
        vector,
        cache,
    });

    let api_state = ApiState::new(config.clone(), indexer, tracker, health);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn({
        let shutdown_tx = shutdown_tx.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                shutdown_tx.send(true).ok();
            }
        }
    });

    // Background sweeper keeps pending and fallback documents moving.
    tokio::spawn(run_sweeper_loop(
        Arc::clone(&graph) as Arc<dyn SkeletonStore>,
        Arc::clone(&publisher) as Arc<dyn EnrichmentQueue>,
        config.clone(),
        shutdown_rx.clone(),
    ));

    let app = axum::Router::new()
        .merge(api_routes(&api_state))
        .with_state(api_state);

    info!("Starting producer service on 0.0.0.0:{}", config.http_port);
    let listener =
        tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port)).await?;
    let mut shutdown_rx = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.changed().await.ok();
        })
        .await?;

    Ok(())
}

use std::sync::Arc;
use std::time::Duration;

use common::{error::AppError, utils::config::AppConfig, utils::embedding::EmbeddingProvider};
use tokio::sync::Semaphore;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::{instrument, warn};

/// Bounded access to this instance's embedding endpoint. Each consumer in
/// the fleet is pinned to one backend; the semaphore keeps a bulk ingest
/// from saturating it.
pub struct EmbeddingPool {
    provider: Arc<EmbeddingProvider>,
    permits: Arc<Semaphore>,
    retries: u32,
    request_timeout: Duration,
}

impl EmbeddingPool {
    pub fn new(provider: Arc<EmbeddingProvider>, config: &AppConfig) -> Self {
        Self {
            provider,
            permits: Arc::new(Semaphore::new(config.max_concurrent_embeddings)),
            retries: config.embedding_retries,
            request_timeout: Duration::from_secs(config.timeouts.embedding_request_secs),
        }
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// All-zero vector of the configured dimension, written when the
    /// backend is unavailable so the rest of the enrichment still lands.
    pub fn zero_vector(&self) -> Vec<f32> {
        vec![0.0; self.provider.dimension()]
    }

    /// Embeds with bounded concurrency, per-call timeout, and jittered
    /// backoff. The error after the final attempt surfaces to the vector
    /// stage, which degrades to the zero-vector fallback.
    #[instrument(skip_all, fields(chars = input.len()))]
    pub async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| AppError::InternalError("embedding semaphore closed".into()))?;

        let strategy = ExponentialBackoff::from_millis(500)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.retries as usize);

        RetryIf::spawn(
            strategy,
            || async {
                match tokio::time::timeout(self.request_timeout, self.provider.embed(input)).await
                {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            timeout_secs = self.request_timeout.as_secs(),
                            "embedding request timed out"
                        );
                        Err(AppError::Timeout("embedding request".into()))
                    }
                }
            },
            |err: &AppError| err.is_retriable(),
        )
        .await
    }

    /// Startup validation: the live model must produce the configured
    /// dimension. Mismatch is fatal before any event is consumed.
    pub async fn validate_dimension(&self) -> Result<usize, AppError> {
        self.provider.probe_dimension().await
    }
}

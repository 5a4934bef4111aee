use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use common::{
    error::AppError,
    events::enrichment::{EnrichmentRequestEvent, EnrichmentResult},
    storage::{
        cache::CacheClient,
        graph::GraphClient,
        types::{document::Document, document::EnrichmentStatus, vector_point::VectorPoint},
        vector::VectorClient,
    },
};
use tracing::debug;

use crate::{
    embedding_pool::EmbeddingPool,
    intelligence::IntelligenceClient,
    resilience::breaker::{BreakerRegistry, CircuitBreaker},
};

/// Downstream names used for circuit breakers and health snapshots.
pub const DOWNSTREAM_INTELLIGENCE: &str = "intelligence";
pub const DOWNSTREAM_EMBEDDING: &str = "embedding";
pub const DOWNSTREAM_GRAPH: &str = "graph";
pub const DOWNSTREAM_VECTOR: &str = "vector";

/// Side effects the pipeline stages perform, behind a trait so the stage
/// logic is testable without live services.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn generate_intelligence(
        &self,
        request: &EnrichmentRequestEvent,
    ) -> Result<EnrichmentResult, AppError>;

    /// Embeds the semantic text for the document. A final failure here is
    /// handled by the vector stage with a zero-vector fallback.
    async fn embed_text(&self, input: &str) -> Result<Vec<f32>, AppError>;

    fn embedding_dimension(&self) -> usize;

    async fn enriched_content_hash(
        &self,
        project: &str,
        file_path: &str,
    ) -> Result<Option<String>, AppError>;

    async fn upsert_vector(&self, point: &VectorPoint) -> Result<(), AppError>;

    async fn apply_graph(
        &self,
        document: &Document,
        result: &EnrichmentResult,
    ) -> Result<(), AppError>;

    async fn set_document_status(
        &self,
        project: &str,
        content_hash: &str,
        status: EnrichmentStatus,
    ) -> Result<(), AppError>;

    async fn mark_enriched(
        &self,
        project: &str,
        content_hash: &str,
        vector_fallback: bool,
    ) -> Result<(), AppError>;

    async fn warm_cache(&self, project: &str, keys: &[String]) -> Result<(), AppError>;

    /// Closed/open view of every downstream, attached to DLQ records.
    fn service_health(&self) -> std::collections::BTreeMap<String, bool>;
}

/// Runs a downstream call through its circuit breaker: short-circuits when
/// open, counts retriable failures, and closes again on success.
pub async fn with_breaker<T, F>(breaker: &Arc<CircuitBreaker>, call: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    breaker.check()?;
    match call.await {
        Ok(value) => {
            breaker.record_success();
            Ok(value)
        }
        Err(err) => {
            if err.is_retriable() {
                breaker.record_failure();
            }
            Err(err)
        }
    }
}

pub struct DefaultPipelineServices {
    intelligence: IntelligenceClient,
    embeddings: EmbeddingPool,
    graph: GraphClient,
    vector: VectorClient,
    cache: Option<CacheClient>,
    breakers: BreakerRegistry,
    cache_warm_ttl: std::time::Duration,
}

impl DefaultPipelineServices {
    pub fn new(
        intelligence: IntelligenceClient,
        embeddings: EmbeddingPool,
        graph: GraphClient,
        vector: VectorClient,
        cache: Option<CacheClient>,
        breakers: BreakerRegistry,
    ) -> Self {
        Self {
            intelligence,
            embeddings,
            graph,
            vector,
            cache,
            breakers,
            cache_warm_ttl: std::time::Duration::from_secs(3600),
        }
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn generate_intelligence(
        &self,
        request: &EnrichmentRequestEvent,
    ) -> Result<EnrichmentResult, AppError> {
        let breaker = self.breakers.get(DOWNSTREAM_INTELLIGENCE);
        with_breaker(&breaker, self.intelligence.generate(request)).await
    }

    async fn embed_text(&self, input: &str) -> Result<Vec<f32>, AppError> {
        let breaker = self.breakers.get(DOWNSTREAM_EMBEDDING);
        with_breaker(&breaker, self.embeddings.embed(input)).await
    }

    fn embedding_dimension(&self) -> usize {
        self.embeddings.dimension()
    }

    async fn enriched_content_hash(
        &self,
        project: &str,
        file_path: &str,
    ) -> Result<Option<String>, AppError> {
        let breaker = self.breakers.get(DOWNSTREAM_GRAPH);
        with_breaker(&breaker, self.graph.enriched_content_hash(project, file_path)).await
    }

    async fn upsert_vector(&self, point: &VectorPoint) -> Result<(), AppError> {
        let breaker = self.breakers.get(DOWNSTREAM_VECTOR);
        with_breaker(&breaker, self.vector.upsert_points(std::slice::from_ref(point))).await
    }

    async fn apply_graph(
        &self,
        document: &Document,
        result: &EnrichmentResult,
    ) -> Result<(), AppError> {
        let breaker = self.breakers.get(DOWNSTREAM_GRAPH);
        with_breaker(&breaker, self.graph.apply_enrichment(document, result)).await
    }

    async fn set_document_status(
        &self,
        project: &str,
        content_hash: &str,
        status: EnrichmentStatus,
    ) -> Result<(), AppError> {
        self.graph
            .set_enrichment_status(project, content_hash, status)
            .await
    }

    async fn mark_enriched(
        &self,
        project: &str,
        content_hash: &str,
        vector_fallback: bool,
    ) -> Result<(), AppError> {
        self.graph
            .mark_enriched(project, content_hash, vector_fallback)
            .await
    }

    async fn warm_cache(&self, project: &str, keys: &[String]) -> Result<(), AppError> {
        let Some(cache) = &self.cache else {
            return Err(AppError::NotFound("cache not configured".into()));
        };
        for key in keys {
            cache
                .set_with_ttl(
                    &format!("archon:warm:{project}:{key}"),
                    "1",
                    self.cache_warm_ttl,
                )
                .await?;
        }
        debug!(project, keys = keys.len(), "project cache warmed");
        Ok(())
    }

    fn service_health(&self) -> std::collections::BTreeMap<String, bool> {
        self.breakers.snapshot()
    }
}

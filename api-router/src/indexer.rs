use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use common::{
    error::AppError,
    events::enrichment::{
        DocumentType, EnrichmentRequestEvent, EnrichmentType, Priority,
    },
    kafka::publisher::EnrichmentQueue,
    metrics,
    storage::graph::SkeletonStore,
    storage::types::document::{Document, IndexResult},
    utils::{
        config::AppConfig,
        hashing::{content_hash, rollout_bucket},
        validation::{is_safe_path, normalize_language},
    },
};

/// Body of `POST /process/document`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessDocumentRequest {
    #[serde(default)]
    pub document_id: Option<Uuid>,
    pub project_id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
    pub document_type: String,
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

/// Synchronous enrichment fallback used when the async rollout excludes a
/// project. Wired in by the binary; absent in minimal deployments.
#[async_trait]
pub trait InlineEnricher: Send + Sync {
    async fn enrich_now(&self, request: &EnrichmentRequestEvent) -> Result<(), AppError>;
}

/// The producer: synchronously indexes a document skeleton and queues the
/// expensive enrichment. The caller gets a status URL back in well under the
/// latency budget; everything slow happens behind the event.
pub struct DocumentIndexer {
    config: AppConfig,
    graph: Arc<dyn SkeletonStore>,
    queue: Arc<dyn EnrichmentQueue>,
    inline: Option<Arc<dyn InlineEnricher>>,
}

impl DocumentIndexer {
    pub fn new(
        config: AppConfig,
        graph: Arc<dyn SkeletonStore>,
        queue: Arc<dyn EnrichmentQueue>,
        inline: Option<Arc<dyn InlineEnricher>>,
    ) -> Self {
        Self {
            config,
            graph,
            queue,
            inline,
        }
    }

    /// Percentage rollout: a project is on the async path when the feature
    /// is enabled and its stable bucket falls under the rollout percentage.
    pub fn should_use_async(&self, project: &str) -> bool {
        self.config.enable_async_enrichment
            && rollout_bucket(project) < self.config.async_enrichment_rollout_percentage
    }

    fn validate(&self, request: &ProcessDocumentRequest) -> Result<String, AppError> {
        if request.project_id.trim().is_empty() {
            return Err(AppError::Validation("project_id is empty".into()));
        }
        // Content exactly at the limit is accepted; one byte over is not.
        if request.content.len() > self.config.max_content_size_bytes {
            return Err(AppError::Validation(format!(
                "content size {} exceeds limit {}",
                request.content.len(),
                self.config.max_content_size_bytes
            )));
        }
        let path = request
            .source_path
            .clone()
            .or_else(|| request.title.clone())
            .ok_or_else(|| {
                AppError::Validation("either source_path or title is required".into())
            })?;
        if !is_safe_path(&path, &self.config.allowed_base_paths()) {
            return Err(AppError::Validation(format!("unsafe file path: {path}")));
        }
        Ok(path)
    }

    #[instrument(skip_all, fields(project = %request.project_id))]
    pub async fn index(&self, request: ProcessDocumentRequest) -> Result<IndexResult, AppError> {
        let started = Instant::now();
        let file_path = self.validate(&request)?;

        let hash = content_hash(request.content.as_bytes());
        let document_id = request.document_id.unwrap_or_else(Uuid::new_v4);
        let status_url = self.config.status_url(&document_id);

        // Idempotent short-circuit: this exact content is already enriched.
        if self
            .graph
            .enrichment_completed(&request.project_id, &hash)
            .await?
        {
            info!(%document_id, "content already enriched; short-circuiting");
            metrics::INDEX_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());
            return Ok(IndexResult {
                document_id,
                skeleton_indexed: false,
                enrichment_queued: false,
                status_url,
            });
        }

        let language = request
            .language
            .as_deref()
            .and_then(normalize_language);
        let mut document = Document::new(
            document_id,
            request.project_id.clone(),
            hash.clone(),
            file_path.clone(),
            DocumentType::parse_lenient(&request.document_type),
            language,
        );
        document.metadata = request.metadata.clone();
        document
            .metadata
            .insert("content_size_bytes".into(), json!(request.content.len()));
        if let Some(title) = &request.title {
            document.metadata.insert("title".into(), json!(title));
        }

        // Skeleton first. A graph failure here fails the call; nothing has
        // been queued yet.
        self.graph.upsert_skeleton(&document).await?;

        let event = EnrichmentRequestEvent {
            document_id,
            project_name: request.project_id.clone(),
            content_hash: hash,
            file_path,
            document_type: document.document_type,
            language: document.language.clone(),
            enrichment_type: EnrichmentType::Full,
            priority: request.priority.unwrap_or_default(),
            correlation_id: Uuid::new_v4(),
            indexed_at: document.indexed_at,
            metadata: document.metadata.clone(),
            retry_count: 0,
        };

        let enrichment_queued = if self.should_use_async(&request.project_id) {
            // An emit failure must not fail the caller: the document stays
            // pending and the sweeper re-emits it.
            match self.queue.publish_request(&event).await {
                Ok(()) => true,
                Err(err) => {
                    warn!(
                        %document_id,
                        correlation_id = %event.correlation_id,
                        error = %err,
                        "enrichment emit failed; sweeper will retry"
                    );
                    false
                }
            }
        } else if let Some(inline) = &self.inline {
            info!(%document_id, "project outside async rollout; enriching inline");
            inline.enrich_now(&event).await?;
            false
        } else {
            warn!(
                project = %request.project_id,
                "async rollout excludes project but no inline enricher is wired; queueing anyway"
            );
            self.queue.publish_request(&event).await.is_ok()
        };

        metrics::INDEX_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());
        info!(
            %document_id,
            correlation_id = %event.correlation_id,
            enrichment_queued,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "document skeleton indexed"
        );

        Ok(IndexResult {
            document_id,
            skeleton_indexed: true,
            enrichment_queued,
            status_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::kafka::publisher::RecordingQueue;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FakeGraph {
        completed_hashes: Vec<(String, String)>,
        skeletons: Mutex<Vec<Document>>,
    }

    #[async_trait]
    impl SkeletonStore for FakeGraph {
        async fn enrichment_completed(
            &self,
            project: &str,
            content_hash: &str,
        ) -> Result<bool, AppError> {
            Ok(self
                .completed_hashes
                .iter()
                .any(|(p, h)| p == project && h == content_hash))
        }

        async fn upsert_skeleton(&self, document: &Document) -> Result<(), AppError> {
            self.skeletons.lock().await.push(document.clone());
            Ok(())
        }

        async fn pending_documents(
            &self,
            _older_than: chrono::Duration,
            _limit: usize,
        ) -> Result<Vec<Document>, AppError> {
            Ok(Vec::new())
        }

        async fn fallback_documents(
            &self,
            _limit: usize,
        ) -> Result<Vec<common::storage::types::document::FallbackDocument>, AppError> {
            Ok(Vec::new())
        }

        async fn record_fallback_sweep(
            &self,
            _project: &str,
            _content_hash: &str,
        ) -> Result<(), AppError> {
            Ok(())
        }
    }

    fn config() -> AppConfig {
        serde_json::from_value(serde_json::json!({})).expect("defaults deserialize")
    }

    fn body(content: &str) -> ProcessDocumentRequest {
        ProcessDocumentRequest {
            document_id: None,
            project_id: "demo".into(),
            title: Some("a.py".into()),
            content: content.into(),
            document_type: "code".into(),
            source_path: Some("a.py".into()),
            language: Some("python".into()),
            metadata: Map::new(),
            priority: None,
        }
    }

    fn indexer(graph: FakeGraph, queue: Arc<RecordingQueue>) -> DocumentIndexer {
        DocumentIndexer::new(config(), Arc::new(graph), queue, None)
    }

    #[tokio::test]
    async fn index_writes_skeleton_then_queues_event() {
        let queue = Arc::new(RecordingQueue::default());
        let indexer = indexer(FakeGraph::default(), Arc::clone(&queue));

        let result = indexer
            .index(body("def hello(): pass"))
            .await
            .expect("index succeeds");
        assert!(result.skeleton_indexed);
        assert!(result.enrichment_queued);
        assert!(result.status_url.contains(&result.document_id.to_string()));

        let published = queue.published.lock().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].document_id, result.document_id);
        assert_eq!(published[0].retry_count, 0);
        assert_eq!(
            published[0].content_hash,
            content_hash(b"def hello(): pass")
        );
        assert!(published[0]
            .metadata
            .get("content_size_bytes")
            .is_some());
    }

    #[tokio::test]
    async fn already_completed_content_short_circuits() {
        let queue = Arc::new(RecordingQueue::default());
        let hash = content_hash(b"def hello(): pass");
        let graph = FakeGraph {
            completed_hashes: vec![("demo".into(), hash)],
            ..FakeGraph::default()
        };
        let indexer = indexer(graph, Arc::clone(&queue));

        let result = indexer
            .index(body("def hello(): pass"))
            .await
            .expect("index succeeds");
        assert!(!result.skeleton_indexed);
        assert!(!result.enrichment_queued);
        assert!(queue.published.lock().await.is_empty());
    }

    #[tokio::test]
    async fn oversized_content_is_rejected_at_the_boundary() {
        let queue = Arc::new(RecordingQueue::default());
        let mut config = config();
        config.max_content_size_bytes = 16;
        let indexer = DocumentIndexer::new(
            config,
            Arc::new(FakeGraph::default()),
            Arc::clone(&queue),
            None,
        );

        // Exactly at the limit: accepted.
        let at_limit = indexer.index(body(&"x".repeat(16))).await;
        assert!(at_limit.is_ok());

        // One byte over: rejected.
        let over = indexer.index(body(&"x".repeat(17))).await;
        assert!(matches!(over, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn unsafe_path_is_rejected() {
        let queue = Arc::new(RecordingQueue::default());
        let indexer = indexer(FakeGraph::default(), Arc::clone(&queue));
        let mut request = body("content");
        request.source_path = Some("../../etc/passwd".into());

        let result = indexer.index(request).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(queue.published.lock().await.is_empty());
    }

    #[test]
    fn rollout_gate_follows_percentage() {
        let queue = Arc::new(RecordingQueue::default());
        let mut config = config();
        config.async_enrichment_rollout_percentage = 0;
        let gated = DocumentIndexer::new(
            config.clone(),
            Arc::new(FakeGraph::default()),
            Arc::clone(&queue),
            None,
        );
        assert!(!gated.should_use_async("demo"));

        config.async_enrichment_rollout_percentage = 100;
        let open = DocumentIndexer::new(
            config.clone(),
            Arc::new(FakeGraph::default()),
            Arc::clone(&queue),
            None,
        );
        assert!(open.should_use_async("demo"));

        config.enable_async_enrichment = false;
        let disabled =
            DocumentIndexer::new(config, Arc::new(FakeGraph::default()), queue, None);
        assert!(!disabled.should_use_async("demo"));
    }
}

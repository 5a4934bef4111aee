use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use common::{
    error::AppError,
    events::enrichment::{EnrichmentRequestEvent, EnrichmentType},
    kafka::publisher::EnrichmentQueue,
    storage::graph::SkeletonStore,
    storage::types::document::Document,
    utils::config::AppConfig,
};

fn request_for(document: &Document, enrichment_type: EnrichmentType) -> EnrichmentRequestEvent {
    EnrichmentRequestEvent {
        document_id: document.document_id,
        project_name: document.project_name.clone(),
        content_hash: document.content_hash.clone(),
        file_path: document.file_path.clone(),
        document_type: document.document_type,
        language: document.language.clone(),
        enrichment_type,
        priority: Default::default(),
        correlation_id: Uuid::new_v4(),
        indexed_at: document.indexed_at,
        metadata: document.metadata.clone(),
        retry_count: 0,
    }
}

/// One sweep: re-emits stale `pending` documents whose enrichment event was
/// lost, and republishes completed documents stuck on a zero-vector
/// fallback. Fallback reprocessing escalates: the first republish asks for
/// an entities-only re-enrichment, and only a document that stays on the
/// fallback after that gets a full re-enrichment.
pub async fn sweep_once(
    graph: &dyn SkeletonStore,
    queue: &dyn EnrichmentQueue,
    config: &AppConfig,
) -> Result<(usize, usize), AppError> {
    let pending_age = chrono::Duration::seconds(config.sweeper_pending_age_secs as i64);

    let pending = graph
        .pending_documents(pending_age, config.sweeper_batch_size)
        .await?;
    let mut re_emitted = 0;
    for document in &pending {
        match queue
            .publish_request(&request_for(document, EnrichmentType::Full))
            .await
        {
            Ok(()) => re_emitted += 1,
            Err(err) => warn!(
                document_id = %document.document_id,
                error = %err,
                "sweeper re-emit failed"
            ),
        }
    }

    let fallbacks = graph.fallback_documents(config.sweeper_batch_size).await?;
    let mut reprocessed = 0;
    for fallback in &fallbacks {
        let document = &fallback.document;
        let enrichment_type = if fallback.reprocess_attempts == 0 {
            EnrichmentType::EntitiesOnly
        } else {
            EnrichmentType::Full
        };
        match queue
            .publish_request(&request_for(document, enrichment_type))
            .await
        {
            Ok(()) => {
                reprocessed += 1;
                if let Err(err) = graph
                    .record_fallback_sweep(&document.project_name, &document.content_hash)
                    .await
                {
                    warn!(
                        document_id = %document.document_id,
                        error = %err,
                        "fallback sweep count update failed"
                    );
                }
            }
            Err(err) => warn!(
                document_id = %document.document_id,
                error = %err,
                "fallback republish failed"
            ),
        }
    }

    if re_emitted > 0 || reprocessed > 0 {
        info!(
            pending = pending.len(),
            re_emitted,
            fallbacks = fallbacks.len(),
            reprocessed,
            "sweep finished"
        );
    }
    Ok((re_emitted, reprocessed))
}

/// Background loop around [`sweep_once`] at the configured interval.
pub async fn run_sweeper_loop(
    graph: Arc<dyn SkeletonStore>,
    queue: Arc<dyn EnrichmentQueue>,
    config: AppConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = Duration::from_secs(config.sweeper_interval_secs);
    info!(interval_secs = interval.as_secs(), "pending sweeper started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            () = tokio::time::sleep(interval) => {}
        }

        if let Err(err) = sweep_once(graph.as_ref(), queue.as_ref(), &config).await {
            error!(error = %err, "sweep failed");
        }
    }

    info!("pending sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::events::enrichment::DocumentType;
    use common::kafka::publisher::RecordingQueue;
    use common::storage::types::document::FallbackDocument;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct StaleGraph {
        pending: Vec<Document>,
        fallbacks: Vec<FallbackDocument>,
        sweep_counts: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl SkeletonStore for StaleGraph {
        async fn enrichment_completed(
            &self,
            _project: &str,
            _content_hash: &str,
        ) -> Result<bool, AppError> {
            Ok(false)
        }

        async fn upsert_skeleton(&self, _document: &Document) -> Result<(), AppError> {
            Ok(())
        }

        async fn pending_documents(
            &self,
            _older_than: chrono::Duration,
            _limit: usize,
        ) -> Result<Vec<Document>, AppError> {
            Ok(self.pending.clone())
        }

        async fn fallback_documents(
            &self,
            _limit: usize,
        ) -> Result<Vec<FallbackDocument>, AppError> {
            Ok(self.fallbacks.clone())
        }

        async fn record_fallback_sweep(
            &self,
            project: &str,
            content_hash: &str,
        ) -> Result<(), AppError> {
            self.sweep_counts
                .lock()
                .await
                .push((project.to_string(), content_hash.to_string()));
            Ok(())
        }
    }

    fn document(path: &str) -> Document {
        Document::new(
            Uuid::new_v4(),
            "demo",
            "ab".repeat(32),
            path,
            DocumentType::Code,
            None,
        )
    }

    #[tokio::test]
    async fn sweep_re_emits_pending_documents_as_full() {
        let graph = StaleGraph {
            pending: vec![document("stale.py"), document("lost.py")],
            ..StaleGraph::default()
        };
        let queue = RecordingQueue::default();
        let config: AppConfig =
            serde_json::from_value(serde_json::json!({})).expect("defaults");

        let (re_emitted, reprocessed) = sweep_once(&graph, &queue, &config)
            .await
            .expect("sweep succeeds");
        assert_eq!(re_emitted, 2);
        assert_eq!(reprocessed, 0);

        let published = queue.published.lock().await;
        assert_eq!(published.len(), 2);
        assert!(published.iter().all(|event| event.retry_count == 0));
        assert!(published
            .iter()
            .all(|event| event.enrichment_type == EnrichmentType::Full));
    }

    #[tokio::test]
    async fn fallback_reprocessing_escalates_entities_only_to_full() {
        let first_pass = document("zero_vector.py");
        let second_pass = document("still_zero.py");
        let graph = StaleGraph {
            fallbacks: vec![
                FallbackDocument {
                    document: first_pass.clone(),
                    reprocess_attempts: 0,
                },
                FallbackDocument {
                    document: second_pass.clone(),
                    reprocess_attempts: 1,
                },
            ],
            ..StaleGraph::default()
        };
        let queue = RecordingQueue::default();
        let config: AppConfig =
            serde_json::from_value(serde_json::json!({})).expect("defaults");

        let (re_emitted, reprocessed) = sweep_once(&graph, &queue, &config)
            .await
            .expect("sweep succeeds");
        assert_eq!(re_emitted, 0);
        assert_eq!(reprocessed, 2);

        // First republish is the gentler entities-only pass.
        let gentle = queue.published_for(first_pass.document_id).await;
        assert_eq!(gentle.len(), 1);
        assert_eq!(gentle[0].enrichment_type, EnrichmentType::EntitiesOnly);

        // A document that already had its entities-only pass escalates.
        let escalated = queue.published_for(second_pass.document_id).await;
        assert_eq!(escalated.len(), 1);
        assert_eq!(escalated[0].enrichment_type, EnrichmentType::Full);

        // Each republish is counted so the next sweep can escalate.
        let counts = graph.sweep_counts.lock().await;
        assert_eq!(counts.len(), 2);
    }
}

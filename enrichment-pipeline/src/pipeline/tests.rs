use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{
    error::AppError,
    events::enrichment::{
        CompletionStatus, DlqClassification, DlqEvent, EnrichmentCompletedEvent,
        EnrichmentFailedEvent, EnrichmentProgressEvent, EnrichmentRequestEvent, EnrichmentResult,
        ExtractedEntity,
    },
    storage::status::{InMemoryStatusStore, StatusTracker},
    storage::types::{
        document::{Document, EnrichmentStatus},
        task_status::{StepStatus, TaskState},
        vector_point::VectorPoint,
    },
};
use tokio::sync::Mutex;

use super::{
    config::{PipelineConfig, PipelineTuning},
    emitter::PipelineEmitter,
    services::PipelineServices,
    EnrichmentPipeline, PipelineOutcome,
};

const TEST_EMBEDDING_DIM: usize = 1536;

#[derive(Default)]
struct MockServices {
    enriched_hash: Option<String>,
    fail_intelligence: Option<&'static str>,
    circuit_open: bool,
    fail_embedding: bool,
    fail_graph: bool,
    calls: Mutex<Vec<&'static str>>,
    upserted: Mutex<Vec<VectorPoint>>,
    marked_enriched: Mutex<Vec<(String, String, bool)>>,
    statuses: Mutex<Vec<EnrichmentStatus>>,
}

impl MockServices {
    fn analysis() -> EnrichmentResult {
        EnrichmentResult {
            entities: vec![
                ExtractedEntity {
                    id: "fn:hello".into(),
                    name: "hello".into(),
                    entity_type: "function".into(),
                },
                ExtractedEntity {
                    id: "cls:Greeter".into(),
                    name: "Greeter".into(),
                    entity_type: "class".into(),
                },
            ],
            quality_score: 0.8,
            complexity_score: 0.2,
            patterns: vec!["factory".into()],
            anti_patterns: vec![],
            themes: vec!["greeting".into()],
            concepts: vec!["salutation".into(), "politeness".into()],
            onex_type: Some("module".into()),
            embedding: None,
        }
    }

    async fn record(&self, call: &'static str) {
        self.calls.lock().await.push(call);
    }
}

#[async_trait]
impl PipelineServices for MockServices {
    async fn generate_intelligence(
        &self,
        _request: &EnrichmentRequestEvent,
    ) -> Result<EnrichmentResult, AppError> {
        self.record("intelligence").await;
        if self.circuit_open {
            return Err(AppError::CircuitOpen("intelligence".into()));
        }
        if let Some(reason) = self.fail_intelligence {
            return Err(AppError::Upstream {
                status: 503,
                message: reason.to_string(),
            });
        }
        Ok(Self::analysis())
    }

    async fn embed_text(&self, _input: &str) -> Result<Vec<f32>, AppError> {
        self.record("embed").await;
        if self.fail_embedding {
            return Err(AppError::Timeout("embedding request".into()));
        }
        Ok(vec![0.3; TEST_EMBEDDING_DIM])
    }

    fn embedding_dimension(&self) -> usize {
        TEST_EMBEDDING_DIM
    }

    async fn enriched_content_hash(
        &self,
        _project: &str,
        _file_path: &str,
    ) -> Result<Option<String>, AppError> {
        self.record("hash_lookup").await;
        Ok(self.enriched_hash.clone())
    }

    async fn upsert_vector(&self, point: &VectorPoint) -> Result<(), AppError> {
        self.record("vector").await;
        self.upserted.lock().await.push(point.clone());
        Ok(())
    }

    async fn apply_graph(
        &self,
        _document: &Document,
        _result: &EnrichmentResult,
    ) -> Result<(), AppError> {
        self.record("graph").await;
        if self.fail_graph {
            return Err(AppError::Processing("graph write failed".into()));
        }
        Ok(())
    }

    async fn set_document_status(
        &self,
        _project: &str,
        _content_hash: &str,
        status: EnrichmentStatus,
    ) -> Result<(), AppError> {
        self.statuses.lock().await.push(status);
        Ok(())
    }

    async fn mark_enriched(
        &self,
        project: &str,
        content_hash: &str,
        vector_fallback: bool,
    ) -> Result<(), AppError> {
        self.marked_enriched
            .lock()
            .await
            .push((project.to_string(), content_hash.to_string(), vector_fallback));
        Ok(())
    }

    async fn warm_cache(&self, _project: &str, _keys: &[String]) -> Result<(), AppError> {
        self.record("cache").await;
        Ok(())
    }

    fn service_health(&self) -> BTreeMap<String, bool> {
        BTreeMap::from([("intelligence".to_string(), !self.circuit_open)])
    }
}

#[derive(Default)]
struct RecordingEmitter {
    retries: Mutex<Vec<EnrichmentRequestEvent>>,
    completed: Mutex<Vec<EnrichmentCompletedEvent>>,
    failed: Mutex<Vec<EnrichmentFailedEvent>>,
    dlq: Mutex<Vec<DlqEvent>>,
    progress: Mutex<Vec<EnrichmentProgressEvent>>,
}

#[async_trait]
impl PipelineEmitter for RecordingEmitter {
    async fn emit_retry(&self, request: &EnrichmentRequestEvent) -> Result<(), AppError> {
        self.retries.lock().await.push(request.clone());
        Ok(())
    }

    async fn emit_completed(&self, event: &EnrichmentCompletedEvent) -> Result<(), AppError> {
        self.completed.lock().await.push(event.clone());
        Ok(())
    }

    async fn emit_failed(&self, event: &EnrichmentFailedEvent) -> Result<(), AppError> {
        self.failed.lock().await.push(event.clone());
        Ok(())
    }

    async fn emit_dlq(&self, event: &DlqEvent) -> Result<(), AppError> {
        self.dlq.lock().await.push(event.clone());
        Ok(())
    }

    async fn emit_progress(&self, event: &EnrichmentProgressEvent) -> Result<(), AppError> {
        self.progress.lock().await.push(event.clone());
        Ok(())
    }
}

fn pipeline_config() -> PipelineConfig {
    PipelineConfig {
        tuning: PipelineTuning {
            retry_base_delay_secs: 0,
            retry_jitter_ratio: 0.0,
            ..PipelineTuning::default()
        },
        allowed_base_paths: Vec::new(),
        progress_events: false,
    }
}

struct Harness {
    pipeline: EnrichmentPipeline,
    services: Arc<MockServices>,
    emitter: Arc<RecordingEmitter>,
    tracker: StatusTracker,
}

fn harness(services: MockServices) -> Harness {
    let services = Arc::new(services);
    let emitter = Arc::new(RecordingEmitter::default());
    let tracker = StatusTracker::new(Arc::new(InMemoryStatusStore::new(
        std::time::Duration::from_secs(60),
    )));
    let pipeline = EnrichmentPipeline::new(
        pipeline_config(),
        Arc::clone(&services) as Arc<dyn PipelineServices>,
        tracker.clone(),
        Arc::clone(&emitter) as Arc<dyn PipelineEmitter>,
    );
    Harness {
        pipeline,
        services,
        emitter,
        tracker,
    }
}

#[tokio::test]
async fn happy_path_runs_all_stages_in_order() {
    let h = harness(MockServices::default());
    let request = EnrichmentRequestEvent::synthetic("demo", "src/greeting.py");

    let outcome = h
        .pipeline
        .process_event(request.clone())
        .await
        .expect("pipeline succeeds");
    assert_eq!(outcome, PipelineOutcome::Completed(CompletionStatus::Success));

    let calls = h.services.calls.lock().await.clone();
    assert_eq!(&calls[0..2], ["hash_lookup", "intelligence"]);
    // Vector and graph run concurrently; both must appear after stamp.
    assert!(calls.contains(&"embed"));
    assert!(calls.contains(&"vector"));
    assert!(calls.contains(&"graph"));
    assert_eq!(calls.last(), Some(&"cache"));

    let completed = h.emitter.completed.lock().await;
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].status, CompletionStatus::Success);
    assert_eq!(completed[0].entities_extracted, 2);
    assert!(completed[0].vector_indexed);
    for stage in ["validate", "intelligence", "stamp", "persist", "cache"] {
        assert!(
            completed[0].stage_durations_ms.contains_key(stage),
            "missing duration for {stage}"
        );
    }

    let status = h
        .tracker
        .get(request.document_id)
        .await
        .expect("tracker get")
        .expect("status present");
    assert_eq!(status.status, TaskState::Success);
    assert_eq!(status.entities_extracted, Some(2));
    assert_eq!(
        status.pipeline_steps.get("vector"),
        Some(&StepStatus::Success)
    );

    let marked = h.services.marked_enriched.lock().await;
    assert_eq!(marked.len(), 1);
    assert!(!marked[0].2, "no fallback on the happy path");
}

#[tokio::test]
async fn unsafe_path_dead_letters_without_intelligence_call() {
    let h = harness(MockServices::default());
    let mut request = EnrichmentRequestEvent::synthetic("demo", "a.py");
    request.file_path = "../../etc/passwd".into();

    let outcome = h
        .pipeline
        .process_event(request.clone())
        .await
        .expect("terminal outcome");
    assert_eq!(outcome, PipelineOutcome::DeadLettered);

    let calls = h.services.calls.lock().await.clone();
    assert!(
        !calls.contains(&"intelligence"),
        "validation failure must not reach the intelligence service"
    );

    let dlq = h.emitter.dlq.lock().await;
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].classification, Some(DlqClassification::DataQuality));
    assert_eq!(dlq[0].error_code, "INVALID_INPUT");
    assert!(!dlq[0].retry_allowed);

    let failed = h.emitter.failed.lock().await;
    assert_eq!(failed.len(), 1);

    let status = h
        .tracker
        .get(request.document_id)
        .await
        .expect("tracker get")
        .expect("status present");
    assert_eq!(status.status, TaskState::Failed);
    assert_eq!(
        status.pipeline_steps.get("validate"),
        Some(&StepStatus::Failed)
    );

    let statuses = h.services.statuses.lock().await.clone();
    assert_eq!(statuses.last(), Some(&EnrichmentStatus::Dlq));
}

#[tokio::test]
async fn retriable_failure_under_budget_schedules_retry() {
    let h = harness(MockServices {
        fail_intelligence: Some("service unavailable"),
        ..MockServices::default()
    });
    let request = EnrichmentRequestEvent::synthetic("demo", "a.py");

    let outcome = h
        .pipeline
        .process_event(request.clone())
        .await
        .expect("terminal outcome");
    assert_eq!(outcome, PipelineOutcome::RetryScheduled);

    let retries = h.emitter.retries.lock().await;
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].retry_count, 1);
    assert_eq!(retries[0].document_id, request.document_id);
    assert_eq!(retries[0].correlation_id, request.correlation_id);

    assert!(h.emitter.dlq.lock().await.is_empty());
}

#[tokio::test]
async fn exhausted_retry_budget_dead_letters_as_transient() {
    let h = harness(MockServices {
        fail_intelligence: Some("still down"),
        ..MockServices::default()
    });
    let mut request = EnrichmentRequestEvent::synthetic("demo", "a.py");
    request.retry_count = 3;

    let outcome = h
        .pipeline
        .process_event(request.clone())
        .await
        .expect("terminal outcome");
    assert_eq!(outcome, PipelineOutcome::DeadLettered);

    let dlq = h.emitter.dlq.lock().await;
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].classification, Some(DlqClassification::Transient));
    assert_eq!(dlq[0].original_event.retry_count, 3);
    assert_eq!(dlq[0].failure_count, 4);
    assert!(h.emitter.retries.lock().await.is_empty());
}

#[tokio::test]
async fn open_circuit_routes_to_dlq_as_service_down() {
    let h = harness(MockServices {
        circuit_open: true,
        ..MockServices::default()
    });
    let request = EnrichmentRequestEvent::synthetic("demo", "a.py");

    let outcome = h
        .pipeline
        .process_event(request)
        .await
        .expect("terminal outcome");
    assert_eq!(outcome, PipelineOutcome::DeadLettered);

    let dlq = h.emitter.dlq.lock().await;
    assert_eq!(dlq[0].classification, Some(DlqClassification::ServiceDown));
    assert_eq!(
        dlq[0].error_details.service_health.get("intelligence"),
        Some(&false)
    );
    assert!(h.emitter.retries.lock().await.is_empty());
}

#[tokio::test]
async fn embedding_failure_degrades_to_zero_vector_fallback() {
    let h = harness(MockServices {
        fail_embedding: true,
        ..MockServices::default()
    });
    let request = EnrichmentRequestEvent::synthetic("demo", "a.py");

    let outcome = h
        .pipeline
        .process_event(request.clone())
        .await
        .expect("pipeline proceeds despite embedding failure");
    assert_eq!(outcome, PipelineOutcome::Completed(CompletionStatus::Partial));

    let points = h.services.upserted.lock().await;
    assert_eq!(points.len(), 1);
    assert!(points[0].vector.iter().all(|v| *v == 0.0));
    assert_eq!(points[0].vector.len(), TEST_EMBEDDING_DIM);
    assert!(points[0].payload.fallback_vector);

    let status = h
        .tracker
        .get(request.document_id)
        .await
        .expect("tracker get")
        .expect("status present");
    assert_eq!(
        status.pipeline_steps.get("vector"),
        Some(&StepStatus::Failed)
    );
    assert_eq!(status.vector_indexed, Some(false));

    let marked = h.services.marked_enriched.lock().await;
    assert!(marked[0].2, "fallback must be flagged for the sweeper");
}

#[tokio::test]
async fn graph_failure_with_vector_success_completes_partial() {
    let h = harness(MockServices {
        fail_graph: true,
        ..MockServices::default()
    });
    let request = EnrichmentRequestEvent::synthetic("demo", "a.py");

    let outcome = h
        .pipeline
        .process_event(request.clone())
        .await
        .expect("partial completion");
    assert_eq!(outcome, PipelineOutcome::Completed(CompletionStatus::Partial));

    let status = h
        .tracker
        .get(request.document_id)
        .await
        .expect("tracker get")
        .expect("status present");
    assert_eq!(
        status.pipeline_steps.get("graph"),
        Some(&StepStatus::Failed)
    );
    assert_eq!(
        status.pipeline_steps.get("vector"),
        Some(&StepStatus::Success)
    );
}

#[tokio::test]
async fn unchanged_content_skips_expensive_stages() {
    let request = EnrichmentRequestEvent::synthetic("demo", "a.py");
    let h = harness(MockServices {
        enriched_hash: Some(request.content_hash.clone()),
        ..MockServices::default()
    });

    let outcome = h
        .pipeline
        .process_event(request.clone())
        .await
        .expect("pipeline succeeds");
    assert_eq!(outcome, PipelineOutcome::Completed(CompletionStatus::Success));

    let calls = h.services.calls.lock().await.clone();
    assert!(!calls.contains(&"intelligence"));
    assert!(!calls.contains(&"embed"));
    assert!(!calls.contains(&"vector"));
    assert!(!calls.contains(&"graph"));

    let status = h
        .tracker
        .get(request.document_id)
        .await
        .expect("tracker get")
        .expect("status present");
    assert_eq!(
        status.pipeline_steps.get("intelligence"),
        Some(&StepStatus::Skipped)
    );
    assert_eq!(
        status.pipeline_steps.get("vector"),
        Some(&StepStatus::Skipped)
    );
}

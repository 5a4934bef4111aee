use std::sync::Arc;
use std::time::Duration;

use api_router::{
    api_routes,
    api_state::ApiState,
    health::{DependencyStatus, HealthCheck},
    indexer::DocumentIndexer,
};
use async_trait::async_trait;
use axum_test::TestServer;
use common::{
    error::AppError,
    kafka::publisher::{EnrichmentQueue, RecordingQueue},
    storage::graph::SkeletonStore,
    storage::status::{InMemoryStatusStore, StatusTracker},
    storage::types::document::{Document, FallbackDocument},
    utils::{config::AppConfig, hashing::content_hash},
};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

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

    async fn fallback_documents(&self, _limit: usize) -> Result<Vec<FallbackDocument>, AppError> {
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

struct StubHealth {
    statuses: Vec<(&'static str, bool, bool)>,
}

#[async_trait]
impl HealthCheck for StubHealth {
    async fn probe(&self) -> Vec<DependencyStatus> {
        self.statuses
            .iter()
            .map(|(name, critical, healthy)| DependencyStatus {
                name,
                critical: *critical,
                healthy: *healthy,
                detail: if *healthy {
                    String::new()
                } else {
                    "down".into()
                },
            })
            .collect()
    }
}

struct TestHarness {
    server: TestServer,
    queue: Arc<RecordingQueue>,
    tracker: StatusTracker,
}

fn test_config() -> AppConfig {
    serde_json::from_value(json!({})).expect("defaults deserialize")
}

fn harness_with(config: AppConfig, graph: FakeGraph, health: StubHealth) -> TestHarness {
    let queue = Arc::new(RecordingQueue::default());
    let tracker = StatusTracker::new(Arc::new(InMemoryStatusStore::new(Duration::from_secs(
        3600,
    ))));
    let indexer = Arc::new(DocumentIndexer::new(
        config.clone(),
        Arc::new(graph),
        Arc::clone(&queue) as Arc<dyn EnrichmentQueue>,
        None,
    ));
    let state = ApiState::new(config, indexer, tracker.clone(), Arc::new(health));
    let app = axum::Router::new().merge(api_routes(&state)).with_state(state);
    TestHarness {
        server: TestServer::new(app).expect("test server"),
        queue,
        tracker,
    }
}

fn harness() -> TestHarness {
    harness_with(
        test_config(),
        FakeGraph::default(),
        StubHealth {
            statuses: vec![("kafka", true, true), ("graph", true, true)],
        },
    )
}

fn document_body(content: &str) -> Value {
    json!({
        "project_id": "demo",
        "title": "a.py",
        "content": content,
        "document_type": "code",
        "source_path": "a.py",
    })
}

#[tokio::test]
async fn process_document_indexes_and_queues() {
    let h = harness();

    let response = h
        .server
        .post("/process/document")
        .json(&document_body("def hello(): pass"))
        .await;
    assert_eq!(response.status_code(), 200);

    let body: Value = response.json();
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["status"], json!("processing_queued"));
    let document_id: Uuid = serde_json::from_value(body["document_id"].clone()).expect("uuid");
    assert!(body["status_url"]
        .as_str()
        .expect("status_url")
        .contains(&document_id.to_string()));

    let published = h.queue.published.lock().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].document_id, document_id);
    assert_eq!(
        published[0].content_hash,
        content_hash(b"def hello(): pass")
    );
}

#[tokio::test]
async fn resubmitting_completed_content_is_idempotent() {
    let content = "def hello(): pass";
    let graph = FakeGraph {
        completed_hashes: vec![("demo".into(), content_hash(content.as_bytes()))],
        ..FakeGraph::default()
    };
    let h = harness_with(
        test_config(),
        graph,
        StubHealth {
            statuses: vec![("kafka", true, true)],
        },
    );

    let response = h
        .server
        .post("/process/document")
        .json(&document_body(content))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["status"], json!("already_completed"));
    assert!(h.queue.published.lock().await.is_empty());
}

#[tokio::test]
async fn oversized_content_returns_422() {
    let mut config = test_config();
    config.max_content_size_bytes = 32;
    let h = harness_with(
        config,
        FakeGraph::default(),
        StubHealth {
            statuses: vec![("kafka", true, true)],
        },
    );

    // Exactly at the limit passes validation.
    let at_limit = h
        .server
        .post("/process/document")
        .json(&document_body(&"x".repeat(32)))
        .await;
    assert_eq!(at_limit.status_code(), 200);

    // One byte over is rejected.
    let over = h
        .server
        .post("/process/document")
        .json(&document_body(&"x".repeat(33)))
        .await;
    assert_eq!(over.status_code(), 422);
    assert!(h.queue.published.lock().await.len() == 1);
}

#[tokio::test]
async fn status_endpoint_serves_tracker_state() {
    let h = harness();
    let document_id = Uuid::new_v4();
    let correlation_id = Uuid::new_v4();

    h.tracker
        .record_start(document_id, correlation_id)
        .await
        .expect("record start");
    h.tracker
        .record_success(document_id, 5, true)
        .await
        .expect("record success");

    let response = h
        .server
        .get(&format!("/process/document/{document_id}/status"))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["status"], json!("success"));
    assert_eq!(body["entities_extracted"], json!(5));
    assert_eq!(body["correlation_id"], json!(correlation_id.to_string()));

    let missing = h
        .server
        .get(&format!("/process/document/{}/status", Uuid::new_v4()))
        .await;
    assert_eq!(missing.status_code(), 404);
}

#[tokio::test]
async fn health_reflects_dependency_state() {
    let healthy = harness_with(
        test_config(),
        FakeGraph::default(),
        StubHealth {
            statuses: vec![("kafka", true, true), ("cache", false, true)],
        },
    );
    let response = healthy.server.get("/health").await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.json::<Value>()["status"], json!("healthy"));

    let degraded = harness_with(
        test_config(),
        FakeGraph::default(),
        StubHealth {
            statuses: vec![("kafka", true, true), ("cache", false, false)],
        },
    );
    let response = degraded.server.get("/health").await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.json::<Value>()["status"], json!("degraded"));

    let unhealthy = harness_with(
        test_config(),
        FakeGraph::default(),
        StubHealth {
            statuses: vec![("kafka", true, false)],
        },
    );
    let response = unhealthy.server.get("/health").await;
    assert_eq!(response.status_code(), 503);
    assert_eq!(response.json::<Value>()["status"], json!("unhealthy"));
}

#[tokio::test]
async fn metrics_endpoint_exposes_prometheus_text() {
    let h = harness();
    // Touch a counter so the exposition is non-empty.
    common::metrics::EVENTS_CONSUMED.inc();

    let response = h.server.get("/metrics").await;
    assert_eq!(response.status_code(), 200);
    assert!(response.text().contains("archon_"));
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::AppError,
    storage::cache::CacheClient,
    storage::types::task_status::{PipelineStep, StepStatus, TaskStatus},
};

/// Default lifetime of a status record.
pub const STATUS_TTL: Duration = Duration::from_secs(24 * 3600);

/// Backing store for task status records. The distributed store survives
/// worker restarts; the in-memory fallback does not, which degrades the
/// status endpoint to "recent local work only".
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn put(&self, status: &TaskStatus) -> Result<(), AppError>;
    async fn get(&self, document_id: Uuid) -> Result<Option<TaskStatus>, AppError>;
}

fn status_key(document_id: Uuid) -> String {
    format!("archon:task-status:{document_id}")
}

pub struct RedisStatusStore {
    cache: CacheClient,
    ttl: Duration,
}

impl RedisStatusStore {
    pub fn new(cache: CacheClient, ttl: Duration) -> Self {
        Self { cache, ttl }
    }
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn put(&self, status: &TaskStatus) -> Result<(), AppError> {
        let payload = serde_json::to_string(status)?;
        self.cache
            .set_with_ttl(&status_key(status.document_id), &payload, self.ttl)
            .await
    }

    async fn get(&self, document_id: Uuid) -> Result<Option<TaskStatus>, AppError> {
        match self.cache.get(&status_key(document_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

/// Process-local fallback store with lazy TTL expiry.
pub struct InMemoryStatusStore {
    entries: DashMap<Uuid, (TaskStatus, Instant)>,
    ttl: Duration,
}

impl InMemoryStatusStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn put(&self, status: &TaskStatus) -> Result<(), AppError> {
        self.entries
            .insert(status.document_id, (status.clone(), Instant::now()));
        Ok(())
    }

    async fn get(&self, document_id: Uuid) -> Result<Option<TaskStatus>, AppError> {
        let expired = match self.entries.get(&document_id) {
            Some(entry) => entry.value().1.elapsed() > self.ttl,
            None => return Ok(None),
        };
        if expired {
            self.entries.remove(&document_id);
            return Ok(None);
        }
        Ok(self
            .entries
            .get(&document_id)
            .map(|entry| entry.value().0.clone()))
    }
}

/// Facade every pipeline stage writes through. Each document has a single
/// owning worker at any instant, so read-modify-write on the record is safe
/// with last-writer-wins semantics.
#[derive(Clone)]
pub struct StatusTracker {
    store: Arc<dyn StatusStore>,
}

impl StatusTracker {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }

    /// Connects to the distributed store, falling back to the in-memory
    /// store when redis is unreachable.
    pub async fn connect(redis_url: &str, ttl: Duration) -> Self {
        match CacheClient::connect(redis_url).await {
            Ok(cache) => Self::new(Arc::new(RedisStatusStore::new(cache, ttl))),
            Err(err) => {
                warn!(
                    error = %err,
                    "status store unreachable; falling back to in-memory tracking"
                );
                Self::new(Arc::new(InMemoryStatusStore::new(ttl)))
            }
        }
    }

    pub async fn record_start(
        &self,
        document_id: Uuid,
        correlation_id: Uuid,
    ) -> Result<(), AppError> {
        let status = TaskStatus::started(document_id, correlation_id);
        self.store.put(&status).await
    }

    pub async fn update_step(
        &self,
        document_id: Uuid,
        step: PipelineStep,
        step_status: StepStatus,
    ) -> Result<(), AppError> {
        let Some(mut status) = self.store.get(document_id).await? else {
            debug!(%document_id, step = step.as_str(), "status record missing on step update");
            return Ok(());
        };
        status.set_step(step, step_status);
        self.store.put(&status).await
    }

    pub async fn record_success(
        &self,
        document_id: Uuid,
        entities_extracted: usize,
        vector_indexed: bool,
    ) -> Result<(), AppError> {
        let Some(mut status) = self.store.get(document_id).await? else {
            return Ok(());
        };
        status.finish_success(entities_extracted, vector_indexed);
        self.store.put(&status).await
    }

    pub async fn record_failure(
        &self,
        document_id: Uuid,
        error_message: String,
        error_details: Option<Value>,
    ) -> Result<(), AppError> {
        let Some(mut status) = self.store.get(document_id).await? else {
            return Ok(());
        };
        status.finish_failure(error_message, error_details);
        self.store.put(&status).await
    }

    pub async fn get(&self, document_id: Uuid) -> Result<Option<TaskStatus>, AppError> {
        self.store.get(document_id).await
    }
}

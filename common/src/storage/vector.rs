use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    error::AppError,
    storage::types::vector_point::VectorPoint,
    utils::config::AppConfig,
};

/// REST client for the vector collection. Point ids are deterministic, so
/// every write is an idempotent upsert.
#[derive(Clone)]
pub struct VectorClient {
    http: reqwest::Client,
    base_url: String,
    collection: String,
    write_attempts: usize,
}

#[derive(Debug, Deserialize)]
struct CollectionInfoResponse {
    result: CollectionInfo,
}

#[derive(Debug, Deserialize)]
pub struct CollectionInfo {
    #[serde(default)]
    pub points_count: u64,
    pub config: CollectionConfig,
}

#[derive(Debug, Deserialize)]
pub struct CollectionConfig {
    pub params: CollectionParams,
}

#[derive(Debug, Deserialize)]
pub struct CollectionParams {
    pub vectors: VectorParams,
}

#[derive(Debug, Deserialize)]
pub struct VectorParams {
    pub size: u64,
}

impl VectorClient {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeouts.http_connect_secs))
            .timeout(Duration::from_secs(config.timeouts.http_request_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.qdrant_url.trim_end_matches('/').to_string(),
            collection: config.vector_collection.clone(),
            write_attempts: config.embedding_retries as usize + 1,
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, AppError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(AppError::Upstream {
            status: status.as_u16(),
            message,
        })
    }

    pub async fn collection_info(&self) -> Result<Option<CollectionInfo>, AppError> {
        let response = self.http.get(self.collection_url()).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response).await?;
        let info: CollectionInfoResponse = response.json().await?;
        Ok(Some(info.result))
    }

    /// Creates the collection when missing and verifies its dimension when
    /// present. A dimension mismatch means the configured embedding model
    /// and the stored vectors disagree, which is unrecoverable at runtime.
    #[instrument(skip(self))]
    pub async fn ensure_collection(&self, dimensions: usize) -> Result<(), AppError> {
        match self.collection_info().await? {
            Some(info) => {
                let live = info.config.params.vectors.size as usize;
                if live != dimensions {
                    return Err(AppError::DataIntegrity(format!(
                        "collection {} has dimension {live}, embedding model produces {dimensions}",
                        self.collection
                    )));
                }
                debug!(collection = %self.collection, dimensions, "vector collection verified");
                Ok(())
            }
            None => {
                let body = json!({
                    "vectors": { "size": dimensions, "distance": "Cosine" }
                });
                let response = self
                    .http
                    .put(self.collection_url())
                    .json(&body)
                    .send()
                    .await?;
                Self::check(response).await?;
                info!(collection = %self.collection, dimensions, "vector collection created");
                Ok(())
            }
        }
    }

    /// Upserts points, retrying transient failures with backoff.
    #[instrument(skip_all, fields(points = points.len()))]
    pub async fn upsert_points(&self, points: &[VectorPoint]) -> Result<(), AppError> {
        if points.is_empty() {
            return Ok(());
        }

        let body = json!({
            "points": points
                .iter()
                .map(|p| json!({
                    "id": p.id.to_string(),
                    "vector": p.vector,
                    "payload": p.payload,
                }))
                .collect::<Vec<_>>()
        });
        let url = format!("{}/points?wait=true", self.collection_url());

        let strategy = ExponentialBackoff::from_millis(200)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.write_attempts.saturating_sub(1));

        RetryIf::spawn(
            strategy,
            || async {
                let response = self.http.put(&url).json(&body).send().await?;
                match Self::check(response).await {
                    Ok(_) => Ok(()),
                    Err(err) => {
                        warn!(error = %err, "vector upsert failed");
                        Err(err)
                    }
                }
            },
            |err: &AppError| err.is_retriable(),
        )
        .await
    }

    /// Existence check through scroll with an id filter.
    pub async fn point_exists(&self, id: Uuid) -> Result<bool, AppError> {
        let body = json!({
            "filter": { "must": [ { "has_id": [id.to_string()] } ] },
            "limit": 1,
            "with_payload": false,
            "with_vector": false,
        });
        let url = format!("{}/points/scroll", self.collection_url());
        let response = self.http.post(&url).json(&body).send().await?;
        let response = Self::check(response).await?;
        let value: Value = response.json().await?;
        let found = value
            .pointer("/result/points")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        Ok(found > 0)
    }

    /// Fetches one point with payload and vector.
    pub async fn get_point(&self, id: Uuid) -> Result<Option<Value>, AppError> {
        let body = json!({
            "ids": [id.to_string()],
            "with_payload": true,
            "with_vector": true,
        });
        let url = format!("{}/points", self.collection_url());
        let response = self.http.post(&url).json(&body).send().await?;
        let response = Self::check(response).await?;
        let value: Value = response.json().await?;
        Ok(value
            .pointer("/result")
            .and_then(Value::as_array)
            .and_then(|points| points.first())
            .cloned())
    }

    pub async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<Value>,
    ) -> Result<Vec<Value>, AppError> {
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(filter) = filter {
            body["filter"] = filter;
        }
        let url = format!("{}/points/search", self.collection_url());
        let response = self.http.post(&url).json(&body).send().await?;
        let response = Self::check(response).await?;
        let value: Value = response.json().await?;
        Ok(value
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    pub async fn scroll(
        &self,
        filter: Option<Value>,
        limit: usize,
    ) -> Result<Vec<Value>, AppError> {
        let mut body = json!({
            "limit": limit,
            "with_payload": true,
            "with_vector": false,
        });
        if let Some(filter) = filter {
            body["filter"] = filter;
        }
        let url = format!("{}/points/scroll", self.collection_url());
        let response = self.http.post(&url).json(&body).send().await?;
        let response = Self::check(response).await?;
        let value: Value = response.json().await?;
        Ok(value
            .pointer("/result/points")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    pub async fn point_count(&self) -> Result<u64, AppError> {
        let url = format!("{}/points/count", self.collection_url());
        let response = self
            .http
            .post(&url)
            .json(&json!({ "exact": true }))
            .send()
            .await?;
        let response = Self::check(response).await?;
        let value: Value = response.json().await?;
        Ok(value
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }

    pub async fn ping(&self) -> Result<(), AppError> {
        let response = self.http.get(self.collection_url()).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}

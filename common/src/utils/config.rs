use config::{Config, Environment, File};
use serde::Deserialize;

use crate::{error::AppError, events::topics::TopicSpec};

/// Categorized timeout surface. Every subsystem reads from here; values are
/// range-checked at startup so a bad override fails fast instead of hanging
/// a worker at runtime.
#[derive(Clone, Deserialize, Debug)]
pub struct Timeouts {
    #[serde(default = "default_http_connect_secs")]
    pub http_connect_secs: u64,
    #[serde(default = "default_http_request_secs")]
    pub http_request_secs: u64,
    #[serde(default = "default_db_query_secs")]
    pub db_query_secs: u64,
    #[serde(default = "default_cache_op_secs")]
    pub cache_op_secs: u64,
    #[serde(default = "default_embedding_request_secs")]
    pub embedding_request_secs: u64,
    #[serde(default = "default_kafka_delivery_secs")]
    pub kafka_delivery_secs: u64,
    #[serde(default = "default_pipeline_total_secs")]
    pub pipeline_total_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            http_connect_secs: default_http_connect_secs(),
            http_request_secs: default_http_request_secs(),
            db_query_secs: default_db_query_secs(),
            cache_op_secs: default_cache_op_secs(),
            embedding_request_secs: default_embedding_request_secs(),
            kafka_delivery_secs: default_kafka_delivery_secs(),
            pipeline_total_secs: default_pipeline_total_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

fn default_http_connect_secs() -> u64 {
    5
}
fn default_http_request_secs() -> u64 {
    30
}
fn default_db_query_secs() -> u64 {
    15
}
fn default_cache_op_secs() -> u64 {
    5
}
fn default_embedding_request_secs() -> u64 {
    30
}
fn default_kafka_delivery_secs() -> u64 {
    10
}
fn default_pipeline_total_secs() -> u64 {
    60
}
fn default_shutdown_grace_secs() -> u64 {
    30
}

impl Timeouts {
    fn check(name: &str, value: u64, range: std::ops::RangeInclusive<u64>) -> Result<(), AppError> {
        if range.contains(&value) {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "timeout {name}={value}s outside allowed range {}..={}s",
                range.start(),
                range.end()
            )))
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        Self::check("http_connect_secs", self.http_connect_secs, 1..=60)?;
        Self::check("http_request_secs", self.http_request_secs, 1..=300)?;
        Self::check("db_query_secs", self.db_query_secs, 1..=120)?;
        Self::check("cache_op_secs", self.cache_op_secs, 1..=60)?;
        Self::check(
            "embedding_request_secs",
            self.embedding_request_secs,
            1..=300,
        )?;
        Self::check("kafka_delivery_secs", self.kafka_delivery_secs, 1..=120)?;
        Self::check("pipeline_total_secs", self.pipeline_total_secs, 5..=600)?;
        Self::check("shutdown_grace_secs", self.shutdown_grace_secs, 1..=300)?;
        Ok(())
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    // Service identity
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    #[serde(default)]
    pub instance_id: u32,

    // Kafka
    #[serde(default = "default_kafka_bootstrap_servers")]
    pub kafka_bootstrap_servers: String,
    #[serde(default = "default_kafka_group_id")]
    pub kafka_group_id: String,
    #[serde(default)]
    pub kafka_enrichment_topic: Option<String>,
    #[serde(default)]
    pub kafka_dlq_topic: Option<String>,
    #[serde(default)]
    pub kafka_completed_topic: Option<String>,
    #[serde(default)]
    pub kafka_progress_topic: Option<String>,
    #[serde(default = "default_kafka_max_poll_records")]
    pub kafka_max_poll_records: u32,

    // Downstream services
    #[serde(default = "default_intelligence_service_url")]
    pub intelligence_service_url: String,
    #[serde(default = "default_memgraph_uri")]
    pub memgraph_uri: String,
    #[serde(default = "default_memgraph_user")]
    pub memgraph_user: String,
    #[serde(default)]
    pub memgraph_password: String,
    #[serde(default = "default_graph_pool_size")]
    pub graph_pool_size: usize,
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,
    #[serde(default = "default_vector_collection")]
    pub vector_collection: String,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    // Embedding backend
    #[serde(default = "default_embedding_base_url")]
    pub embedding_base_url: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
    #[serde(default = "default_embedding_api_key")]
    pub embedding_api_key: String,
    #[serde(default = "default_embedding_retries")]
    pub embedding_retries: u32,
    #[serde(default = "default_max_concurrent_embeddings")]
    pub max_concurrent_embeddings: usize,

    // Pipeline limits
    #[serde(default = "default_max_concurrent_enrichments")]
    pub max_concurrent_enrichments: usize,
    #[serde(default = "default_max_content_size_bytes")]
    pub max_content_size_bytes: usize,
    #[serde(default = "default_max_processing_rate")]
    pub max_processing_rate: f64,
    #[serde(default = "default_allowed_base_paths")]
    pub allowed_base_paths: String,
    #[serde(default = "default_graph_batch_size")]
    pub graph_batch_size: usize,

    // Retry and circuit breaking
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_backoff_base_secs")]
    pub retry_backoff_base_secs: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u32,
    #[serde(default = "default_retry_max_delay_secs")]
    pub retry_max_delay_secs: u64,
    #[serde(default = "default_retry_jitter_ratio")]
    pub retry_jitter_ratio: f64,
    #[serde(default = "default_circuit_breaker_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_circuit_breaker_recovery_timeout_secs")]
    pub circuit_breaker_recovery_timeout_secs: u64,

    // Async rollout
    #[serde(default = "default_true")]
    pub enable_async_enrichment: bool,
    #[serde(default = "default_rollout_percentage")]
    pub async_enrichment_rollout_percentage: u8,

    // Pending/fallback sweeper
    #[serde(default = "default_sweeper_interval_secs")]
    pub sweeper_interval_secs: u64,
    #[serde(default = "default_sweeper_pending_age_secs")]
    pub sweeper_pending_age_secs: u64,
    #[serde(default = "default_sweeper_batch_size")]
    pub sweeper_batch_size: usize,

    // Status tracker and cache warm
    #[serde(default = "default_status_ttl_secs")]
    pub status_ttl_secs: u64,
    #[serde(default = "default_cache_warm_keys")]
    pub cache_warm_keys: usize,

    #[serde(default)]
    pub timeouts: Timeouts,
}

fn default_environment() -> String {
    "dev".to_string()
}
fn default_service_name() -> String {
    "archon-ingest".to_string()
}
fn default_http_port() -> u16 {
    8181
}
fn default_public_base_url() -> String {
    "http://localhost:8181".to_string()
}
fn default_kafka_bootstrap_servers() -> String {
    "localhost:9092".to_string()
}
fn default_kafka_group_id() -> String {
    "archon-enrichment".to_string()
}
fn default_kafka_max_poll_records() -> u32 {
    500
}
fn default_intelligence_service_url() -> String {
    "http://localhost:8053".to_string()
}
fn default_memgraph_uri() -> String {
    "bolt://localhost:7687".to_string()
}
fn default_memgraph_user() -> String {
    "memgraph".to_string()
}
fn default_graph_pool_size() -> usize {
    8
}
fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_vector_collection() -> String {
    "archon_vectors".to_string()
}
fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_embedding_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_embedding_dimensions() -> usize {
    1536
}
fn default_embedding_api_key() -> String {
    // Ollama-compatible servers accept any key
    "archon".to_string()
}
fn default_embedding_retries() -> u32 {
    3
}
fn default_max_concurrent_embeddings() -> usize {
    10
}
fn default_max_concurrent_enrichments() -> usize {
    10
}
fn default_max_content_size_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_max_processing_rate() -> f64 {
    50.0
}
fn default_allowed_base_paths() -> String {
    String::new()
}
fn default_graph_batch_size() -> usize {
    50
}
fn default_retry_max_attempts() -> u32 {
    3
}
fn default_retry_backoff_base_secs() -> u64 {
    2
}
fn default_retry_backoff_multiplier() -> u32 {
    2
}
fn default_retry_max_delay_secs() -> u64 {
    60
}
fn default_retry_jitter_ratio() -> f64 {
    0.1
}
fn default_circuit_breaker_failure_threshold() -> u32 {
    5
}
fn default_circuit_breaker_recovery_timeout_secs() -> u64 {
    60
}
fn default_true() -> bool {
    true
}
fn default_rollout_percentage() -> u8 {
    100
}
fn default_sweeper_interval_secs() -> u64 {
    300
}
fn default_sweeper_pending_age_secs() -> u64 {
    600
}
fn default_sweeper_batch_size() -> usize {
    100
}
fn default_status_ttl_secs() -> u64 {
    24 * 3600
}
fn default_cache_warm_keys() -> usize {
    10
}

impl AppConfig {
    /// Enrichment request topic, explicit override or derived from the
    /// environment segment.
    pub fn enrichment_topic(&self) -> String {
        self.kafka_enrichment_topic
            .clone()
            .unwrap_or_else(|| TopicSpec::enrichment(&self.environment).name)
    }

    pub fn dlq_topic(&self) -> String {
        self.kafka_dlq_topic
            .clone()
            .unwrap_or_else(|| TopicSpec::dlq(&self.environment).name)
    }

    pub fn completed_topic(&self) -> String {
        self.kafka_completed_topic
            .clone()
            .unwrap_or_else(|| TopicSpec::completed(&self.environment).name)
    }

    /// Progress events are optional; only emitted when the topic is set.
    pub fn progress_topic(&self) -> Option<String> {
        self.kafka_progress_topic.clone()
    }

    /// Base paths documents are allowed to originate from, comma separated
    /// in configuration. Empty means any relative path.
    pub fn allowed_base_paths(&self) -> Vec<String> {
        self.allowed_base_paths
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn status_url(&self, document_id: &uuid::Uuid) -> String {
        format!(
            "{}/process/document/{document_id}/status",
            self.public_base_url.trim_end_matches('/')
        )
    }

    pub fn validate(&self) -> Result<(), AppError> {
        self.timeouts.validate()?;
        if !(1..=4096).contains(&self.max_concurrent_enrichments) {
            return Err(AppError::Validation(
                "max_concurrent_enrichments must be between 1 and 4096".into(),
            ));
        }
        if !(1..=4096).contains(&self.max_concurrent_embeddings) {
            return Err(AppError::Validation(
                "max_concurrent_embeddings must be between 1 and 4096".into(),
            ));
        }
        if !(1..=100 * 1024 * 1024).contains(&self.max_content_size_bytes) {
            return Err(AppError::Validation(
                "max_content_size_bytes must be between 1 byte and 100 MiB".into(),
            ));
        }
        if self.max_processing_rate <= 0.0 {
            return Err(AppError::Validation(
                "max_processing_rate must be positive".into(),
            ));
        }
        if !(1..=65536).contains(&self.embedding_dimensions) {
            return Err(AppError::Validation(
                "embedding_dimensions must be between 1 and 65536".into(),
            ));
        }
        if self.retry_max_attempts == 0 || self.retry_max_attempts > 10 {
            return Err(AppError::Validation(
                "retry_max_attempts must be between 1 and 10".into(),
            ));
        }
        if !(0.0..=0.5).contains(&self.retry_jitter_ratio) {
            return Err(AppError::Validation(
                "retry_jitter_ratio must be between 0.0 and 0.5".into(),
            ));
        }
        if self.async_enrichment_rollout_percentage > 100 {
            return Err(AppError::Validation(
                "async_enrichment_rollout_percentage must be at most 100".into(),
            ));
        }
        if self.retry_backoff_base_secs == 0 || self.retry_max_delay_secs == 0 {
            return Err(AppError::Validation(
                "retry backoff delays must be positive".into(),
            ));
        }
        if self.graph_batch_size == 0 || self.graph_batch_size > 1000 {
            return Err(AppError::Validation(
                "graph_batch_size must be between 1 and 1000".into(),
            ));
        }
        Ok(())
    }
}

/// Loads configuration from an optional `config` file plus environment
/// variables, resolves the per-instance embedding endpoint, and validates
/// the whole surface.
pub fn get_config() -> Result<AppConfig, AppError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let mut config: AppConfig = config.try_deserialize()?;

    // Consumer fleet instances are pinned to dedicated embedding endpoints.
    let instance_key = format!("EMBEDDING_BASE_URL_CONSUMER_{}", config.instance_id);
    if let Ok(endpoint) = std::env::var(&instance_key) {
        config.embedding_base_url = endpoint;
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        serde_json::from_value(serde_json::json!({})).expect("defaults deserialize")
    }

    #[test]
    fn defaults_pass_validation() {
        let config = base_config();
        config.validate().expect("defaults valid");
        assert_eq!(config.max_concurrent_enrichments, 10);
        assert_eq!(config.max_content_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.circuit_breaker_failure_threshold, 5);
    }

    #[test]
    fn derived_topics_use_environment() {
        let mut config = base_config();
        config.environment = "prod".to_string();
        assert_eq!(
            config.enrichment_topic(),
            "prod.archon-intelligence.enrich-document.v1"
        );
        config.kafka_enrichment_topic = Some("custom.topic".to_string());
        assert_eq!(config.enrichment_topic(), "custom.topic");
    }

    #[test]
    fn out_of_range_timeout_is_rejected() {
        let mut config = base_config();
        config.timeouts.pipeline_total_secs = 4;
        let err = config.validate().expect_err("must reject");
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn rollout_percentage_is_bounded() {
        let mut config = base_config();
        config.async_enrichment_rollout_percentage = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn allowed_base_paths_splits_and_trims() {
        let mut config = base_config();
        config.allowed_base_paths = "/srv/repos, /data/docs".to_string();
        assert_eq!(
            config.allowed_base_paths(),
            vec!["/srv/repos".to_string(), "/data/docs".to_string()]
        );
        config.allowed_base_paths = String::new();
        assert!(config.allowed_base_paths().is_empty());
    }

    #[test]
    fn status_url_embeds_document_id() {
        let mut config = base_config();
        config.public_base_url = "http://api.internal/".to_string();
        let id = uuid::Uuid::nil();
        assert_eq!(
            config.status_url(&id),
            format!("http://api.internal/process/document/{id}/status")
        );
    }
}

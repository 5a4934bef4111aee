use common::utils::config::AppConfig;

#[derive(Debug, Clone)]
pub struct PipelineTuning {
    pub max_retries: u32,
    pub retry_base_delay_secs: u64,
    pub retry_multiplier: u32,
    pub retry_max_delay_secs: u64,
    pub retry_jitter_ratio: f64,
    pub deadline_secs: u64,
    pub max_content_size_bytes: usize,
    pub cache_warm_keys: usize,
}

impl Default for PipelineTuning {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay_secs: 2,
            retry_multiplier: 2,
            retry_max_delay_secs: 60,
            retry_jitter_ratio: 0.1,
            deadline_secs: 60,
            max_content_size_bytes: 10 * 1024 * 1024,
            cache_warm_keys: 10,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub tuning: PipelineTuning,
    /// Base paths documents may originate from; empty allows any relative
    /// path.
    pub allowed_base_paths: Vec<String>,
    /// Emit per-step progress events when the progress topic is configured.
    pub progress_events: bool,
}

impl PipelineConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            tuning: PipelineTuning {
                max_retries: config.retry_max_attempts,
                retry_base_delay_secs: config.retry_backoff_base_secs,
                retry_multiplier: config.retry_backoff_multiplier,
                retry_max_delay_secs: config.retry_max_delay_secs,
                retry_jitter_ratio: config.retry_jitter_ratio,
                deadline_secs: config.timeouts.pipeline_total_secs,
                max_content_size_bytes: config.max_content_size_bytes,
                cache_warm_keys: config.cache_warm_keys,
            },
            allowed_base_paths: config.allowed_base_paths(),
            progress_events: config.progress_topic().is_some(),
        }
    }
}

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::Utc;
use common::{
    error::AppError,
    events::enrichment::{EnrichmentProgressEvent, EnrichmentRequestEvent, EnrichmentResult},
    storage::status::StatusTracker,
    storage::types::{
        document::Document,
        task_status::{PipelineStep, StepStatus},
    },
};
use tracing::{error, warn};

use super::{config::PipelineConfig, emitter::PipelineEmitter, services::PipelineServices};

/// Mutable state threaded through one pipeline invocation. The deadline is
/// computed once at entry; every stage checks it before doing work.
pub struct PipelineContext<'a> {
    pub request: &'a EnrichmentRequestEvent,
    pub document: Document,
    pub attempt: u32,
    pub deadline: Instant,
    pub config: &'a PipelineConfig,
    pub services: &'a dyn PipelineServices,
    pub tracker: &'a StatusTracker,
    pub emitter: &'a dyn PipelineEmitter,
    pub analysis: Option<EnrichmentResult>,
    pub steps: BTreeMap<String, StepStatus>,
    pub vector_fallback: bool,
    pub vector_indexed: bool,
    pub partial: bool,
    pub skipped_unchanged: bool,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        request: &'a EnrichmentRequestEvent,
        config: &'a PipelineConfig,
        services: &'a dyn PipelineServices,
        tracker: &'a StatusTracker,
        emitter: &'a dyn PipelineEmitter,
    ) -> Self {
        let mut document = Document::new(
            request.document_id,
            request.project_name.clone(),
            request.content_hash.clone(),
            request.file_path.clone(),
            request.document_type,
            request.language.clone(),
        );
        document.indexed_at = request.indexed_at;
        document.metadata = request.metadata.clone();

        let deadline = Instant::now()
            + std::time::Duration::from_secs(config.tuning.deadline_secs);

        Self {
            request,
            document,
            attempt: request.retry_count,
            deadline,
            config,
            services,
            tracker,
            emitter,
            analysis: None,
            steps: BTreeMap::new(),
            vector_fallback: false,
            vector_indexed: false,
            partial: false,
            skipped_unchanged: false,
        }
    }

    /// Stage entry guard; deadline expiry is a retriable failure.
    pub fn check_deadline(&self, stage: PipelineStep) -> Result<(), AppError> {
        if Instant::now() >= self.deadline {
            return Err(AppError::Timeout(format!(
                "pipeline deadline exceeded before {} stage",
                stage.as_str()
            )));
        }
        Ok(())
    }

    /// Records a stage outcome in the status tracker and, when enabled,
    /// emits a progress event. Tracking failures never fail the pipeline.
    pub async fn set_step(&mut self, step: PipelineStep, status: StepStatus) {
        self.steps.insert(step.as_str().to_string(), status);

        if let Err(err) = self
            .tracker
            .update_step(self.request.document_id, step, status)
            .await
        {
            warn!(
                document_id = %self.request.document_id,
                step = step.as_str(),
                error = %err,
                "status tracker update failed"
            );
        }

        if self.config.progress_events {
            let event = EnrichmentProgressEvent {
                document_id: self.request.document_id,
                correlation_id: self.request.correlation_id,
                step: step.as_str().to_string(),
                step_status: format!("{status:?}").to_lowercase(),
                at: Utc::now(),
            };
            if let Err(err) = self.emitter.emit_progress(&event).await {
                warn!(
                    document_id = %self.request.document_id,
                    error = %err,
                    "progress event emit failed"
                );
            }
        }
    }

    pub fn analysis(&self) -> Result<&EnrichmentResult, AppError> {
        self.analysis
            .as_ref()
            .ok_or_else(|| AppError::InternalError("enrichment result expected to be available".into()))
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(
            document_id = %self.request.document_id,
            correlation_id = %self.request.correlation_id,
            attempt = self.attempt,
            error = %err,
            "enrichment pipeline aborted"
        );
        err
    }
}

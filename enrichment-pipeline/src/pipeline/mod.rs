mod config;
mod context;
mod emitter;
mod services;
mod stages;
mod state;

pub use config::{PipelineConfig, PipelineTuning};
pub use emitter::PipelineEmitter;
#[allow(clippy::module_name_repetitions)]
pub use services::{
    with_breaker, DefaultPipelineServices, PipelineServices, DOWNSTREAM_EMBEDDING,
    DOWNSTREAM_GRAPH, DOWNSTREAM_INTELLIGENCE, DOWNSTREAM_VECTOR,
};
pub use stages::semantic_text;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use common::{
    error::AppError,
    events::enrichment::{
        CompletionStatus, DlqEvent, EnrichmentCompletedEvent, EnrichmentFailedEvent,
        EnrichmentRequestEvent, ErrorDetails,
    },
    metrics,
    storage::status::StatusTracker,
    storage::types::document::EnrichmentStatus,
};
use tracing::{debug, info, warn};

use self::{
    context::PipelineContext,
    stages::{enrich, persist, stamp, validate, warm},
    state::ready,
};
use crate::resilience::retry::RetryPolicy;

/// Terminal disposition of one consumed event. All variants allow the
/// consumer to commit the offset; an `Err` from processing does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed(CompletionStatus),
    RetryScheduled,
    DeadLettered,
}

#[allow(clippy::module_name_repetitions)]
pub struct EnrichmentPipeline {
    pipeline_config: PipelineConfig,
    services: Arc<dyn PipelineServices>,
    tracker: StatusTracker,
    emitter: Arc<dyn PipelineEmitter>,
    retry_policy: RetryPolicy,
}

impl EnrichmentPipeline {
    pub fn new(
        pipeline_config: PipelineConfig,
        services: Arc<dyn PipelineServices>,
        tracker: StatusTracker,
        emitter: Arc<dyn PipelineEmitter>,
    ) -> Self {
        let retry_policy = RetryPolicy::from_tuning(&pipeline_config.tuning);
        Self {
            pipeline_config,
            services,
            tracker,
            emitter,
            retry_policy,
        }
    }

    #[tracing::instrument(
        skip_all,
        fields(
            document_id = %request.document_id,
            correlation_id = %request.correlation_id,
            attempt = request.retry_count,
            project = %request.project_name
        )
    )]
    pub async fn process_event(
        &self,
        request: EnrichmentRequestEvent,
    ) -> Result<PipelineOutcome, AppError> {
        if let Err(err) = self
            .tracker
            .record_start(request.document_id, request.correlation_id)
            .await
        {
            warn!(error = %err, "status tracker start failed");
        }
        if let Err(err) = self
            .services
            .set_document_status(
                &request.project_name,
                &request.content_hash,
                EnrichmentStatus::InProgress,
            )
            .await
        {
            warn!(error = %err, "could not mark document in_progress");
        }

        let pipeline_started = Instant::now();
        let mut ctx = PipelineContext::new(
            &request,
            &self.pipeline_config,
            self.services.as_ref(),
            &self.tracker,
            self.emitter.as_ref(),
        );

        match Self::drive(&mut ctx).await {
            Ok(stage_durations_ms) => {
                let total = pipeline_started.elapsed();
                metrics::PIPELINE_DURATION_SECONDS.observe(total.as_secs_f64());

                let status = if ctx.partial {
                    CompletionStatus::Partial
                } else {
                    CompletionStatus::Success
                };
                let outcome_label = match status {
                    CompletionStatus::Success => "success",
                    CompletionStatus::Partial => "partial",
                };
                metrics::ENRICHMENTS_TOTAL
                    .with_label_values(&[outcome_label])
                    .inc();

                let entities_extracted = ctx
                    .analysis
                    .as_ref()
                    .map_or(0, |analysis| analysis.entities.len());

                if let Err(err) = self
                    .tracker
                    .record_success(request.document_id, entities_extracted, ctx.vector_indexed)
                    .await
                {
                    warn!(error = %err, "status tracker success record failed");
                }

                let completed = EnrichmentCompletedEvent {
                    document_id: request.document_id,
                    project_name: request.project_name.clone(),
                    content_hash: request.content_hash.clone(),
                    correlation_id: request.correlation_id,
                    status,
                    stage_durations_ms,
                    entities_extracted,
                    vector_indexed: ctx.vector_indexed,
                    completed_at: Utc::now(),
                };
                if let Err(err) = self.emitter.emit_completed(&completed).await {
                    warn!(error = %err, "completed event emit failed");
                }

                info!(
                    total_ms = total.as_millis() as u64,
                    entities = entities_extracted,
                    partial = ctx.partial,
                    skipped_unchanged = ctx.skipped_unchanged,
                    "enrichment finished"
                );
                Ok(PipelineOutcome::Completed(status))
            }
            Err(err) => self.handle_failure(&request, err).await,
        }
    }

    /// Runs the six stages in order, timing each. Vector and graph run
    /// concurrently inside the persist transition.
    async fn drive(ctx: &mut PipelineContext<'_>) -> Result<BTreeMap<String, u64>, AppError> {
        let mut durations = BTreeMap::new();
        let machine = ready();

        let stage_start = Instant::now();
        let machine = validate(machine, ctx).await.map_err(|err| ctx.abort(err))?;
        record_stage(&mut durations, "validate", stage_start.elapsed());

        let stage_start = Instant::now();
        let machine = enrich(machine, ctx).await.map_err(|err| ctx.abort(err))?;
        record_stage(&mut durations, "intelligence", stage_start.elapsed());

        let stage_start = Instant::now();
        let machine = stamp(machine, ctx).await.map_err(|err| ctx.abort(err))?;
        record_stage(&mut durations, "stamp", stage_start.elapsed());

        let stage_start = Instant::now();
        let machine = persist(machine, ctx).await.map_err(|err| ctx.abort(err))?;
        record_stage(&mut durations, "persist", stage_start.elapsed());

        let stage_start = Instant::now();
        let _machine = warm(machine, ctx).await.map_err(|err| ctx.abort(err))?;
        record_stage(&mut durations, "cache", stage_start.elapsed());

        Ok(durations)
    }

    async fn handle_failure(
        &self,
        request: &EnrichmentRequestEvent,
        err: AppError,
    ) -> Result<PipelineOutcome, AppError> {
        let retriable = err.is_retriable();

        if retriable && self.retry_policy.allows_retry(request.retry_count) {
            let delay = self.retry_policy.delay_for(request.retry_count);
            warn!(
                error = %err,
                retry_in_ms = delay.as_millis() as u64,
                attempt = request.retry_count,
                "enrichment failed; scheduling retry"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            metrics::RETRIES_TOTAL.inc();
            self.emitter.emit_retry(&request.next_attempt()).await?;
            metrics::ENRICHMENTS_TOTAL.with_label_values(&["retry"]).inc();
            return Ok(PipelineOutcome::RetryScheduled);
        }

        // Terminal: failed event, DLQ record, tracker finalization. A DLQ
        // publish failure keeps the offset uncommitted so the event
        // redelivers instead of vanishing.
        let classification = err.dlq_classification();
        let details = ErrorDetails {
            exception_type: err.kind_name().to_string(),
            exception_message: err.to_string(),
            service_health: self.services.service_health(),
        };

        if let Err(tracker_err) = self
            .tracker
            .record_failure(
                request.document_id,
                err.to_string(),
                Some(serde_json::json!({
                    "exception_type": details.exception_type,
                    "exception_message": details.exception_message,
                })),
            )
            .await
        {
            warn!(error = %tracker_err, "status tracker failure record failed");
        }

        if let Err(status_err) = self
            .services
            .set_document_status(
                &request.project_name,
                &request.content_hash,
                EnrichmentStatus::Dlq,
            )
            .await
        {
            warn!(error = %status_err, "could not mark document dlq");
        }

        let failed = EnrichmentFailedEvent {
            document_id: request.document_id,
            project_name: request.project_name.clone(),
            correlation_id: request.correlation_id,
            error_code: err.error_code().to_string(),
            error_message: err.to_string(),
            retry_count: request.retry_count,
            retry_allowed: false,
            failed_at: Utc::now(),
        };
        if let Err(emit_err) = self.emitter.emit_failed(&failed).await {
            warn!(error = %emit_err, "failed event emit failed");
        }

        let dlq = DlqEvent {
            document_id: request.document_id,
            failure_reason: err.to_string(),
            failure_timestamp: Utc::now(),
            failure_count: request.retry_count.saturating_add(1),
            error_code: err.error_code().to_string(),
            retry_allowed: false,
            classification: Some(classification),
            original_event: request.clone(),
            error_details: details,
        };
        self.emitter.emit_dlq(&dlq).await?;

        metrics::ENRICHMENTS_TOTAL.with_label_values(&["dlq"]).inc();
        debug!(
            classification = classification.as_str(),
            error = %err,
            "event routed to dead letter queue"
        );
        Ok(PipelineOutcome::DeadLettered)
    }
}

fn record_stage(durations: &mut BTreeMap<String, u64>, stage: &str, elapsed: Duration) {
    metrics::STAGE_DURATION_SECONDS
        .with_label_values(&[stage])
        .observe(elapsed.as_secs_f64());
    durations.insert(
        stage.to_string(),
        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
    );
}

#[cfg(test)]
mod tests;

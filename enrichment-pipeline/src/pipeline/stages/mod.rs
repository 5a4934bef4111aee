use common::{
    error::AppError,
    events::enrichment::EnrichmentResult,
    metrics,
    storage::types::{
        document::Document,
        task_status::{PipelineStep, StepStatus},
        vector_point::VectorPoint,
    },
    utils::validation::{is_safe_path, normalize_language},
};
use serde_json::json;
use state_machines::core::GuardError;
use tracing::{debug, instrument, warn};

use super::{
    context::PipelineContext,
    state::{Enriched, EnrichmentMachine, Persisted, Ready, Stamped, Validated, Warmed},
};

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid enrichment pipeline transition during {event}: {guard:?}"
    ))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(document_id = %ctx.request.document_id, attempt = ctx.attempt)
)]
pub async fn validate(
    machine: EnrichmentMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
) -> Result<EnrichmentMachine<(), Validated>, AppError> {
    ctx.check_deadline(PipelineStep::Validate)?;

    let request = ctx.request;
    let checks: Result<(), AppError> = (|| {
        if request.project_name.trim().is_empty() {
            return Err(AppError::Validation("project_name is empty".into()));
        }
        if request.content_hash.len() != 64
            || !request.content_hash.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(AppError::Validation(
                "content_hash is not a 64-char hex digest".into(),
            ));
        }
        if !is_safe_path(&request.file_path, &ctx.config.allowed_base_paths) {
            return Err(AppError::Validation(format!(
                "unsafe file path: {}",
                request.file_path
            )));
        }
        if let Some(size) = request
            .metadata
            .get("content_size_bytes")
            .and_then(serde_json::Value::as_u64)
        {
            let limit = ctx.config.tuning.max_content_size_bytes as u64;
            if size > limit {
                return Err(AppError::Validation(format!(
                    "content size {size} exceeds limit {limit}"
                )));
            }
        }
        Ok(())
    })();

    if let Err(err) = checks {
        ctx.set_step(PipelineStep::Validate, StepStatus::Failed).await;
        return Err(err);
    }

    match ctx.request.language.as_deref().map(normalize_language) {
        Some(Some(normalized)) => ctx.document.language = Some(normalized),
        Some(None) => {
            warn!(
                document_id = %request.document_id,
                language = request.language.as_deref().unwrap_or_default(),
                "unrecognized language; marking for auto-detect"
            );
            ctx.document.language = None;
            ctx.document
                .metadata
                .insert("language_auto_detect".into(), json!(true));
        }
        None => {}
    }

    ctx.set_step(PipelineStep::Validate, StepStatus::Success).await;

    machine
        .validate()
        .map_err(|(_, guard)| map_guard_error("validate", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(document_id = %ctx.request.document_id, attempt = ctx.attempt)
)]
pub async fn enrich(
    machine: EnrichmentMachine<(), Validated>,
    ctx: &mut PipelineContext<'_>,
) -> Result<EnrichmentMachine<(), Enriched>, AppError> {
    ctx.check_deadline(PipelineStep::Intelligence)?;

    // Unchanged content short-circuits the expensive stages; every sink is
    // already up to date for this hash.
    match ctx
        .services
        .enriched_content_hash(&ctx.request.project_name, &ctx.request.file_path)
        .await
    {
        Ok(Some(enriched_hash)) if enriched_hash == ctx.request.content_hash => {
            debug!(
                document_id = %ctx.request.document_id,
                "content hash unchanged; skipping enrichment stages"
            );
            ctx.skipped_unchanged = true;
            ctx.analysis = Some(EnrichmentResult::default());
            ctx.set_step(PipelineStep::Intelligence, StepStatus::Skipped)
                .await;
            return machine
                .enrich()
                .map_err(|(_, guard)| map_guard_error("enrich", &guard));
        }
        Ok(_) => {}
        Err(err) => {
            warn!(
                document_id = %ctx.request.document_id,
                error = %err,
                "enriched-hash lookup failed; continuing without skip"
            );
        }
    }

    match ctx.services.generate_intelligence(ctx.request).await {
        Ok(analysis) => {
            debug!(
                document_id = %ctx.request.document_id,
                entities = analysis.entities.len(),
                concepts = analysis.concepts.len(),
                themes = analysis.themes.len(),
                "intelligence generation completed"
            );
            ctx.analysis = Some(analysis);
            ctx.set_step(PipelineStep::Intelligence, StepStatus::Success)
                .await;
            machine
                .enrich()
                .map_err(|(_, guard)| map_guard_error("enrich", &guard))
        }
        Err(err) => {
            ctx.set_step(PipelineStep::Intelligence, StepStatus::Failed)
                .await;
            Err(err)
        }
    }
}

#[instrument(
    level = "trace",
    skip_all,
    fields(document_id = %ctx.request.document_id, attempt = ctx.attempt)
)]
pub async fn stamp(
    machine: EnrichmentMachine<(), Enriched>,
    ctx: &mut PipelineContext<'_>,
) -> Result<EnrichmentMachine<(), Stamped>, AppError> {
    ctx.check_deadline(PipelineStep::Stamp)?;

    if ctx.skipped_unchanged {
        ctx.set_step(PipelineStep::Stamp, StepStatus::Skipped).await;
        return machine
            .stamp()
            .map_err(|(_, guard)| map_guard_error("stamp", &guard));
    }

    let analysis = ctx.analysis()?.clone();

    let mut tags: Vec<String> = analysis
        .patterns
        .iter()
        .chain(analysis.themes.iter())
        .chain(analysis.concepts.iter())
        .cloned()
        .collect();
    tags.sort();
    tags.dedup();

    let metadata = &mut ctx.document.metadata;
    metadata.insert("quality_score".into(), json!(analysis.quality_score));
    metadata.insert("complexity_score".into(), json!(analysis.complexity_score));
    metadata.insert("patterns".into(), json!(analysis.patterns));
    metadata.insert("anti_patterns".into(), json!(analysis.anti_patterns));
    metadata.insert("themes".into(), json!(analysis.themes));
    metadata.insert("concepts".into(), json!(analysis.concepts));
    metadata.insert("tags".into(), json!(tags));
    if let Some(onex_type) = &analysis.onex_type {
        metadata.insert("onex_type".into(), json!(onex_type));
    }

    ctx.set_step(PipelineStep::Stamp, StepStatus::Success).await;

    machine
        .stamp()
        .map_err(|(_, guard)| map_guard_error("stamp", &guard))
}

/// Text handed to the embedding backend: the document's identity plus the
/// semantic surface the intelligence service extracted.
pub fn semantic_text(document: &Document, result: &EnrichmentResult) -> String {
    let mut parts = vec![
        format!("path: {}", document.file_path),
        format!("project: {}", document.project_name),
    ];
    if let Some(language) = &document.language {
        parts.push(format!("language: {language}"));
    }
    if let Some(onex_type) = &result.onex_type {
        parts.push(format!("type: {onex_type}"));
    }
    if !result.concepts.is_empty() {
        parts.push(format!("concepts: {}", result.concepts.join(", ")));
    }
    if !result.themes.is_empty() {
        parts.push(format!("themes: {}", result.themes.join(", ")));
    }
    if !result.patterns.is_empty() {
        parts.push(format!("patterns: {}", result.patterns.join(", ")));
    }
    let entity_names: Vec<&str> = result.entities.iter().map(|e| e.name.as_str()).collect();
    if !entity_names.is_empty() {
        parts.push(format!("entities: {}", entity_names.join(", ")));
    }
    parts.join("\n")
}

#[instrument(
    level = "trace",
    skip_all,
    fields(document_id = %ctx.request.document_id, attempt = ctx.attempt)
)]
pub async fn persist(
    machine: EnrichmentMachine<(), Stamped>,
    ctx: &mut PipelineContext<'_>,
) -> Result<EnrichmentMachine<(), Persisted>, AppError> {
    ctx.check_deadline(PipelineStep::Vector)?;

    if ctx.skipped_unchanged {
        ctx.set_step(PipelineStep::Vector, StepStatus::Skipped).await;
        ctx.set_step(PipelineStep::Graph, StepStatus::Skipped).await;
        ctx.vector_indexed = true;
        return machine
            .persist()
            .map_err(|(_, guard)| map_guard_error("persist", &guard));
    }

    let analysis = ctx.analysis()?.clone();
    let document = ctx.document.clone();
    let services = ctx.services;

    // Vector and graph sinks are independent; run them concurrently and
    // join before judging the outcome.
    let vector_branch = async {
        let input = semantic_text(&document, &analysis);
        let (vector, fallback) = match services.embed_text(&input).await {
            Ok(vector) => (vector, false),
            Err(err) => {
                warn!(
                    document_id = %document.document_id,
                    error = %err,
                    "embedding failed; writing zero-vector fallback"
                );
                metrics::EMBEDDINGS_FALLBACK.inc();
                (vec![0.0; services.embedding_dimension()], true)
            }
        };
        let point =
            VectorPoint::for_document(&document, vector, analysis.quality_score, fallback);
        services.upsert_vector(&point).await.map(|()| fallback)
    };

    let graph_branch = services.apply_graph(&document, &analysis);

    let (vector_outcome, graph_outcome) = tokio::join!(vector_branch, graph_branch);

    let vector_failed = match &vector_outcome {
        Ok(fallback) => {
            ctx.vector_fallback = *fallback;
            ctx.vector_indexed = !fallback;
            let status = if *fallback {
                StepStatus::Failed
            } else {
                StepStatus::Success
            };
            ctx.set_step(PipelineStep::Vector, status).await;
            *fallback
        }
        Err(_) => {
            // No point landed at all; flag it so the sweeper reconciles.
            ctx.vector_fallback = true;
            ctx.set_step(PipelineStep::Vector, StepStatus::Failed).await;
            true
        }
    };

    let graph_failed = match &graph_outcome {
        Ok(()) => {
            ctx.set_step(PipelineStep::Graph, StepStatus::Success).await;
            false
        }
        Err(_) => {
            ctx.set_step(PipelineStep::Graph, StepStatus::Failed).await;
            true
        }
    };

    // Both sinks down means the attempt made no durable progress; surface
    // the retriable error if there is one.
    if let (Err(vector_err), Err(graph_err)) = (vector_outcome, graph_outcome) {
        debug!(
            vector_error = %vector_err,
            graph_error = %graph_err,
            "both persistence sinks failed"
        );
        return Err(if graph_err.is_retriable() {
            graph_err
        } else {
            vector_err
        });
    }

    ctx.partial = vector_failed || graph_failed;

    if let Err(err) = ctx
        .services
        .mark_enriched(
            &document.project_name,
            &document.content_hash,
            ctx.vector_fallback,
        )
        .await
    {
        warn!(
            document_id = %document.document_id,
            error = %err,
            "failed to finalize enrichment status on file node"
        );
    }

    machine
        .persist()
        .map_err(|(_, guard)| map_guard_error("persist", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(document_id = %ctx.request.document_id, attempt = ctx.attempt)
)]
pub async fn warm(
    machine: EnrichmentMachine<(), Persisted>,
    ctx: &mut PipelineContext<'_>,
) -> Result<EnrichmentMachine<(), Warmed>, AppError> {
    if ctx.skipped_unchanged {
        ctx.set_step(PipelineStep::Cache, StepStatus::Skipped).await;
        return machine
            .warm()
            .map_err(|(_, guard)| map_guard_error("warm", &guard));
    }

    let analysis = ctx.analysis()?;
    let keys: Vec<String> = analysis
        .concepts
        .iter()
        .take(ctx.config.tuning.cache_warm_keys)
        .cloned()
        .collect();

    // Cache warm is best effort; a cold cache is not a failed enrichment.
    let status = if keys.is_empty() {
        StepStatus::Skipped
    } else {
        match ctx
            .services
            .warm_cache(&ctx.request.project_name, &keys)
            .await
        {
            Ok(()) => StepStatus::Success,
            Err(AppError::NotFound(_)) => StepStatus::Skipped,
            Err(err) => {
                warn!(
                    document_id = %ctx.request.document_id,
                    error = %err,
                    "cache warm failed"
                );
                StepStatus::Failed
            }
        }
    };
    ctx.set_step(PipelineStep::Cache, status).await;

    machine
        .warm()
        .map_err(|(_, guard)| map_guard_error("warm", &guard))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::events::enrichment::{DocumentType, ExtractedEntity};
    use uuid::Uuid;

    #[test]
    fn semantic_text_includes_extracted_surface() {
        let document = Document::new(
            Uuid::new_v4(),
            "demo",
            "ab".repeat(32),
            "src/auth.py",
            DocumentType::Code,
            Some("python".into()),
        );
        let result = EnrichmentResult {
            concepts: vec!["authentication".into()],
            themes: vec!["security".into()],
            entities: vec![ExtractedEntity {
                id: "fn:login".into(),
                name: "login".into(),
                entity_type: "function".into(),
            }],
            ..EnrichmentResult::default()
        };
        let text = semantic_text(&document, &result);
        assert!(text.contains("path: src/auth.py"));
        assert!(text.contains("concepts: authentication"));
        assert!(text.contains("entities: login"));
    }
}

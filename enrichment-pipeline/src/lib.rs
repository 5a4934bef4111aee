#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod consumer;
pub mod dlq;
pub mod embedding_pool;
pub mod intelligence;
pub mod pipeline;
pub mod resilience;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use common::{error::AppError, metrics, utils::config::AppConfig};

use crate::{
    consumer::{Consumed, EnrichmentConsumer},
    pipeline::EnrichmentPipeline,
    resilience::backpressure::RateMeter,
};

/// Consumer core: pulls enrichment requests, dispatches them into a bounded
/// worker pool, commits offsets on terminal outcomes, and drains in-flight
/// work on shutdown.
pub async fn run_consumer_loop(
    consumer: Arc<EnrichmentConsumer>,
    pipeline: Arc<EnrichmentPipeline>,
    config: &AppConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), AppError> {
    let worker_id = format!(
        "enrichment-worker-{}-{}",
        config.instance_id,
        Uuid::new_v4()
    );
    let permits = Arc::new(Semaphore::new(config.max_concurrent_enrichments));
    let meter = Arc::new(RateMeter::new(
        config.max_processing_rate,
        Duration::from_secs(10),
    ));
    let mut in_flight: JoinSet<()> = JoinSet::new();

    info!(
        %worker_id,
        topic = consumer.topic(),
        max_concurrent = config.max_concurrent_enrichments,
        "consumer loop started"
    );

    loop {
        // Reap finished tasks so the join set does not grow unbounded.
        while let Some(result) = in_flight.try_join_next() {
            if let Err(err) = result {
                error!(%worker_id, error = %err, "enrichment task panicked");
            }
        }

        if let Some(delay) = meter.required_delay() {
            metrics::BACKPRESSURE_DELAYS.inc();
            warn!(
                %worker_id,
                delay_ms = delay.as_millis() as u64,
                "processing rate over ceiling; backing off"
            );
            tokio::time::sleep(delay).await;
        }

        let consumed = tokio::select! {
            _ = shutdown.changed() => break,
            consumed = consumer.recv() => consumed,
        };

        let event = match consumed {
            Ok(Consumed::Event(event)) => event,
            Ok(Consumed::Malformed { partition, offset }) => {
                // Nothing downstream can do with it; advance past.
                if let Err(err) = consumer.commit_terminal(partition, offset) {
                    error!(%worker_id, error = %err, "commit of malformed event failed");
                }
                continue;
            }
            Err(err) => {
                error!(%worker_id, error = %err, "consumer receive failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        meter.record();

        let permit = permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::InternalError("worker semaphore closed".into()))?;

        let pipeline = Arc::clone(&pipeline);
        let consumer = Arc::clone(&consumer);
        let task_worker_id = worker_id.clone();
        metrics::IN_FLIGHT_ENRICHMENTS.inc();

        in_flight.spawn(async move {
            let document_id = event.request.document_id;
            let (partition, offset) = (event.partition, event.offset);

            match pipeline.process_event(event.request).await {
                Ok(outcome) => {
                    info!(
                        worker_id = %task_worker_id,
                        %document_id,
                        ?outcome,
                        "enrichment task reached terminal state"
                    );
                    if let Err(err) = consumer.commit_terminal(partition, offset) {
                        error!(
                            worker_id = %task_worker_id,
                            %document_id,
                            error = %err,
                            "offset commit failed"
                        );
                    }
                }
                Err(err) => {
                    // No terminal state recorded: leave the offset alone so
                    // the event redelivers.
                    error!(
                        worker_id = %task_worker_id,
                        %document_id,
                        error = %err,
                        "enrichment task failed without terminal state"
                    );
                }
            }

            metrics::IN_FLIGHT_ENRICHMENTS.dec();
            drop(permit);
        });
    }

    // Graceful drain: let in-flight tasks finish within the grace period;
    // anything left becomes unacked and re-delivers elsewhere.
    let grace = Duration::from_secs(config.timeouts.shutdown_grace_secs);
    info!(%worker_id, grace_secs = grace.as_secs(), "draining in-flight enrichments");
    let drained = tokio::time::timeout(grace, async {
        while let Some(result) = in_flight.join_next().await {
            if let Err(err) = result {
                error!(%worker_id, error = %err, "enrichment task panicked during drain");
            }
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            %worker_id,
            remaining = in_flight.len(),
            "shutdown grace elapsed; abandoning in-flight tasks for redelivery"
        );
        in_flight.abort_all();
    }

    info!(%worker_id, "consumer loop stopped");
    Ok(())
}

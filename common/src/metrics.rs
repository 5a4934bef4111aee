use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

use crate::error::AppError;

/// Process-wide metrics registry, rendered by `GET /metrics`.
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

fn counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("valid counter opts");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("unique metric name");
    counter
}

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let counter =
        IntCounterVec::new(Opts::new(name, help), labels).expect("valid counter opts");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("unique metric name");
    counter
}

fn gauge(name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::new(name, help).expect("valid gauge opts");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("unique metric name");
    gauge
}

fn histogram(name: &str, help: &str) -> Histogram {
    let histogram = Histogram::with_opts(HistogramOpts::new(name, help)).expect("valid opts");
    REGISTRY
        .register(Box::new(histogram.clone()))
        .expect("unique metric name");
    histogram
}

fn histogram_vec(name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let histogram =
        HistogramVec::new(HistogramOpts::new(name, help), labels).expect("valid opts");
    REGISTRY
        .register(Box::new(histogram.clone()))
        .expect("unique metric name");
    histogram
}

pub static EVENTS_CONSUMED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "archon_events_consumed_total",
        "Enrichment request events pulled from Kafka",
    )
});

pub static ENRICHMENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "archon_enrichments_total",
        "Enrichment pipeline outcomes",
        &["outcome"],
    )
});

pub static RETRIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "archon_retries_total",
        "Enrichment attempts re-emitted after retriable failures",
    )
});

pub static EMBEDDINGS_FALLBACK: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "archon_embeddings_fallback_total",
        "Vector points written with a zero-vector fallback",
    )
});

pub static ENRICHMENT_PUBLISH_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "archon_enrichment_publish_errors_total",
        "Failed enrichment event publishes (sweeper will re-emit)",
    )
});

pub static DLQ_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "archon_dlq_events_total",
        "Events routed to the dead letter queue",
        &["classification"],
    )
});

pub static CIRCUIT_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "archon_circuit_transitions_total",
        "Circuit breaker state transitions",
        &["downstream", "state"],
    )
});

pub static STAGE_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    histogram_vec(
        "archon_stage_duration_seconds",
        "Per-stage enrichment durations",
        &["stage"],
    )
});

pub static PIPELINE_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    histogram(
        "archon_pipeline_duration_seconds",
        "End-to-end enrichment pipeline durations",
    )
});

pub static INDEX_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    histogram(
        "archon_index_duration_seconds",
        "Producer skeleton-index latency",
    )
});

pub static IN_FLIGHT_ENRICHMENTS: Lazy<IntGauge> = Lazy::new(|| {
    gauge(
        "archon_in_flight_enrichments",
        "Enrichment tasks currently executing",
    )
});

pub static BACKPRESSURE_DELAYS: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "archon_backpressure_delays_total",
        "Dispatcher sleeps triggered by the processing-rate ceiling",
    )
});

/// Renders the registry in Prometheus text exposition format.
pub fn render() -> Result<String, AppError> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| AppError::InternalError(format!("metrics encoding failed: {e}")))?;
    String::from_utf8(buffer)
        .map_err(|e| AppError::InternalError(format!("metrics encoding not utf-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_once_and_render() {
        EVENTS_CONSUMED.inc();
        ENRICHMENTS_TOTAL.with_label_values(&["success"]).inc();
        EMBEDDINGS_FALLBACK.inc();
        let rendered = render().expect("render");
        assert!(rendered.contains("archon_events_consumed_total"));
        assert!(rendered.contains("archon_enrichments_total"));
        assert!(rendered.contains("archon_embeddings_fallback_total"));
    }
}

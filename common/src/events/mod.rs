pub mod enrichment;
pub mod topics;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::AppError;

/// Envelope schema version carried on every event.
pub const ENVELOPE_VERSION: &str = "1.0";

/// Discriminant for every event flowing through the system. Handlers
/// dispatch on this enum rather than inspecting free-form type strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    EnrichmentRequested,
    EnrichmentCompleted,
    EnrichmentFailed,
    EnrichmentProgress,
    EnrichmentDeadLettered,
}

/// Identity of the emitting process, stamped into each envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSource {
    pub service: String,
    pub instance_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl EventSource {
    pub fn new(service: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            instance_id: instance_id.into(),
            hostname: std::env::var("HOSTNAME").ok(),
        }
    }
}

/// Canonical event envelope. Payloads are versioned JSON documents; the
/// correlation id is minted once per logical request and propagated through
/// every hop, while `causation_id` points at the event that produced this one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: EventKind,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<Uuid>,
    pub source: EventSource,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub payload: Value,
}

impl EventEnvelope {
    pub fn new<P: Serialize>(
        event_type: EventKind,
        source: EventSource,
        correlation_id: Uuid,
        payload: &P,
    ) -> Result<Self, AppError> {
        Ok(Self {
            event_id: Uuid::new_v4(),
            event_type,
            version: ENVELOPE_VERSION.to_string(),
            timestamp: Utc::now(),
            correlation_id,
            causation_id: None,
            source,
            metadata: Map::new(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Builds a follow-up envelope caused by this one, keeping the
    /// correlation id and recording this event as the cause.
    pub fn follow<P: Serialize>(
        &self,
        event_type: EventKind,
        source: EventSource,
        payload: &P,
    ) -> Result<Self, AppError> {
        let mut envelope = Self::new(event_type, source, self.correlation_id, payload)?;
        envelope.causation_id = Some(self.event_id);
        Ok(envelope)
    }

    pub fn encode(&self) -> Result<Vec<u8>, AppError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, AppError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Deserializes the payload into its typed form.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::enrichment::EnrichmentRequestEvent;

    #[test]
    fn envelope_round_trips_typed_payload() {
        let source = EventSource::new("archon-producer", "producer-0");
        let request = EnrichmentRequestEvent::synthetic("demo", "a.py");
        let envelope = EventEnvelope::new(
            EventKind::EnrichmentRequested,
            source,
            request.correlation_id,
            &request,
        )
        .expect("envelope");

        let bytes = envelope.encode().expect("encode");
        let decoded = EventEnvelope::decode(&bytes).expect("decode");
        assert_eq!(decoded.event_type, EventKind::EnrichmentRequested);
        assert_eq!(decoded.version, ENVELOPE_VERSION);
        assert_eq!(decoded.correlation_id, request.correlation_id);

        let payload: EnrichmentRequestEvent = decoded.payload_as().expect("payload");
        assert_eq!(payload.document_id, request.document_id);
        assert_eq!(payload.project_name, "demo");
    }

    #[test]
    fn follow_links_causation_and_keeps_correlation() {
        let source = EventSource::new("archon-worker", "worker-1");
        let request = EnrichmentRequestEvent::synthetic("demo", "b.rs");
        let parent = EventEnvelope::new(
            EventKind::EnrichmentRequested,
            source.clone(),
            request.correlation_id,
            &request,
        )
        .expect("parent");

        let child = parent
            .follow(EventKind::EnrichmentCompleted, source, &request)
            .expect("child");
        assert_eq!(child.causation_id, Some(parent.event_id));
        assert_eq!(child.correlation_id, parent.correlation_id);
        assert_ne!(child.event_id, parent.event_id);
    }
}

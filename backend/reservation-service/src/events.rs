/// Event envelopes and the bus sink adapter
///
/// The outbox drainer turns outbox rows into envelopes through
/// `EnvelopePublisher` and submits them via an `EventSink`. Retry and backoff
/// stay with the drainer; the sink reports one attempt's outcome.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use transactional_outbox::{EventPublisher, OutboxEntry, OutboxError, OutboxResult};

/// Domain event types emitted by the reservation core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    ReservationCreated,
    ReservationConfirmed,
    ReservationCancelled,
    ReservationExpired,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ReservationCreated => "RESERVATION_CREATED",
            EventType::ReservationConfirmed => "RESERVATION_CONFIRMED",
            EventType::ReservationCancelled => "RESERVATION_CANCELLED",
            EventType::ReservationExpired => "RESERVATION_EXPIRED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Stable service identifier
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Instant of the originating state change
    pub time: DateTime<Utc>,
    pub detail: serde_json::Value,
    pub trace_id: String,
}

#[derive(Debug, Clone, Error)]
pub enum SinkError {
    #[error("event bus rejected the envelope: {0}")]
    Rejected(String),
    #[error("event bus transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), SinkError>;
}

/// POSTs envelopes to the configured bus endpoint.
pub struct HttpBusSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpBusSink {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), endpoint: endpoint.into() }
    }
}

#[async_trait]
impl EventSink for HttpBusSink {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(envelope)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            info!(
                event_type = %envelope.event_type,
                trace_id = %envelope.trace_id,
                "event published to bus"
            );
            Ok(())
        } else {
            Err(SinkError::Rejected(format!("bus returned {status}")))
        }
    }
}

/// Adapts outbox rows to bus envelopes for the drainer.
pub struct EnvelopePublisher {
    sink: Arc<dyn EventSink>,
    source: String,
}

impl EnvelopePublisher {
    pub fn new(sink: Arc<dyn EventSink>, source: impl Into<String>) -> Self {
        Self { sink, source: source.into() }
    }

    pub fn envelope(&self, entry: &OutboxEntry) -> EventEnvelope {
        EventEnvelope {
            source: self.source.clone(),
            event_type: entry.event_type.clone(),
            time: entry.created_at,
            detail: entry.payload.clone(),
            trace_id: entry.trace_id.clone(),
        }
    }
}

#[async_trait]
impl EventPublisher for EnvelopePublisher {
    async fn publish(&self, entry: &OutboxEntry) -> OutboxResult<()> {
        let envelope = self.envelope(entry);
        self.sink
            .publish(&envelope)
            .await
            .map_err(|e| OutboxError::PublishFailed(e.to_string()))
    }
}

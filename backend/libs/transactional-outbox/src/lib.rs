//! # Transactional Outbox
//!
//! Reliable domain-event publication for the reservation platform. Aggregate
//! mutations and their outbox rows are committed in the same storage
//! transaction; a background drainer later leases due rows and pushes them to
//! the event bus. This guarantees at-least-once delivery even if the service
//! crashes between the state change and the publish.
//!
//! The crate is storage- and transport-agnostic: services implement
//! [`OutboxStore`] on top of whatever gives them atomic conditional writes,
//! and [`EventPublisher`] on top of their bus adapter. The lease step
//! (PENDING → PROCESSING via conditional update) makes concurrent drainers
//! safe; rows that exhaust their retry budget park in terminal FAILED for
//! operator attention.
//!
//! ## Row lifecycle
//!
//! ```text
//! PENDING ──lease──▶ PROCESSING ──publish ok──▶ PUBLISHED (terminal)
//!    ▲                   │
//!    │                   │ publish failed, attempts < max
//!    │                   ▼
//!    └──requeue──── FAILED(next_retry_at) ──attempts == max──▶ FAILED (terminal)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod clock;
mod drainer;
mod error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use drainer::{DrainReport, DrainerConfig, OutboxDrainer};
pub use error::{OutboxError, OutboxResult};

use async_trait::async_trait;

/// Publication state of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Published,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Processing => "PROCESSING",
            OutboxStatus::Published => "PUBLISHED",
            OutboxStatus::Failed => "FAILED",
        }
    }
}

/// A durable domain event, written in the same transaction as the aggregate
/// mutation it describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub outbox_id: Uuid,

    /// ID of the aggregate this event relates to
    pub aggregate_id: String,

    /// Domain event type (e.g. "RESERVATION_CREATED")
    pub event_type: String,

    /// Serialized event detail
    pub payload: serde_json::Value,

    pub status: OutboxStatus,

    /// Failed publish attempts so far
    pub attempts: u32,

    /// When a FAILED row becomes due again; None on terminal rows
    pub next_retry_at: Option<DateTime<Utc>>,

    pub last_error: Option<String>,

    /// Correlation id from the originating request
    pub trace_id: String,

    pub created_at: DateTime<Utc>,
}

impl OutboxEntry {
    /// A fresh PENDING entry, ready to be co-committed with its aggregate.
    pub fn new(
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        trace_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            outbox_id: Uuid::new_v4(),
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            payload,
            status: OutboxStatus::Pending,
            attempts: 0,
            next_retry_at: None,
            last_error: None,
            trace_id: trace_id.into(),
            created_at,
        }
    }
}

/// Storage operations the drainer needs. Implementations must back `lease`
/// and the mark operations with conditional writes so concurrent drainers
/// cannot double-publish.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// PENDING rows plus FAILED rows whose `next_retry_at` has passed,
    /// oldest first.
    async fn fetch_due(&self, now: DateTime<Utc>, limit: usize) -> OutboxResult<Vec<OutboxEntry>>;

    /// Conditionally move the row from its fetched status to PROCESSING.
    /// Returns false if another worker won the row.
    async fn lease(&self, entry: &OutboxEntry) -> OutboxResult<bool>;

    /// PROCESSING → PUBLISHED.
    async fn mark_published(&self, outbox_id: Uuid) -> OutboxResult<()>;

    /// PROCESSING → FAILED with updated retry bookkeeping. A `None`
    /// `next_retry_at` parks the row terminally.
    async fn mark_failed(
        &self,
        outbox_id: Uuid,
        attempts: u32,
        next_retry_at: Option<DateTime<Utc>>,
        error: &str,
    ) -> OutboxResult<()>;

    /// Operator-driven replay: terminal FAILED rows back to PENDING with
    /// their retry bookkeeping reset. Returns how many rows were requeued.
    async fn requeue_failed(&self, limit: usize) -> OutboxResult<u64>;
}

/// Pushes a leased entry to the event bus. Retry is owned by the drainer,
/// not the publisher.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, entry: &OutboxEntry) -> OutboxResult<()>;
}

/// Key-value store gateway
///
/// Typed access to the four logical tables behind five primitives. The store
/// is the platform's single serialization point: every mutation is a
/// conditional write predicated on the row's current status, and coupled
/// aggregate + outbox mutations go through `transactional_write`.
///
/// `Conflict` and `PreconditionFailed` are ordinary business outcomes for the
/// caller to classify; everything else surfaces as a transient storage error.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod memory;
pub mod postgres;
pub mod tables;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("transient storage failure: {0}")]
    Transient(String),
    #[error("stored row could not be decoded: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Reservations,
    Orders,
    Idempotency,
    Outbox,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Reservations => "reservations",
            Table::Orders => "orders",
            Table::Idempotency => "idempotency",
            Table::Outbox => "outbox",
        }
    }
}

/// One row under the `(pk, sk)` key convention. The `status` column is a
/// projection of the body so conditional writes can predicate on it; the two
/// optional instants back the secondary indexes (idempotency TTL / hold
/// expiry, and outbox retry due time).
#[derive(Debug, Clone)]
pub struct StoredRow {
    pub pk: String,
    pub sk: String,
    pub status: String,
    pub body: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub retry_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    PreconditionFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnOutcome {
    Committed,
    /// A condition inside the batch did not hold; nothing was written.
    Aborted,
}

#[derive(Debug, Clone)]
pub enum WriteItem {
    PutIfAbsent { table: Table, row: StoredRow },
    ConditionalUpdate { table: Table, row: StoredRow, expected_status: String },
}

/// Index queries the workers depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanQuery {
    /// Outbox rows due for publication: PENDING, or FAILED with a reached
    /// `retry_at`. Ordered oldest first.
    DueOutbox,
    /// Reservations still in HOLD whose hold deadline has passed.
    ExpiredHolds,
    /// Terminal FAILED outbox rows (no retry scheduled), for operator replay.
    ParkedOutbox,
}

#[async_trait]
pub trait StoreGateway: Send + Sync {
    async fn get(&self, table: Table, pk: &str, sk: &str) -> StoreResult<Option<StoredRow>>;

    /// Insert only if the key is vacant. An expired idempotency row counts as
    /// vacant (out-of-window replays are fresh requests).
    async fn put_if_absent(&self, table: Table, row: StoredRow) -> StoreResult<PutOutcome>;

    /// Replace the row only if its current status matches `expected_status`.
    async fn conditional_update(
        &self,
        table: Table,
        row: StoredRow,
        expected_status: &str,
    ) -> StoreResult<UpdateOutcome>;

    /// Commit all items or none of them.
    async fn transactional_write(&self, items: Vec<WriteItem>) -> StoreResult<TxnOutcome>;

    async fn scan_by_index(
        &self,
        query: ScanQuery,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<StoredRow>>;
}

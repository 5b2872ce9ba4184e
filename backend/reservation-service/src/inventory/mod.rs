/// Inventory coordination protocol
///
/// Four operations against the external inventory service, each under a hard
/// per-call deadline. Mutating calls are single-shot; only `release` may be
/// retried, because it is idempotent by hold token. Business outcomes
/// (conflict, expired, not found) are values, not errors: an `Err` from this
/// trait always means infrastructure trouble.
use crate::context::RequestContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub mod http;
pub mod resilient;

pub use http::HttpInventoryClient;
pub use resilient::ResilientInventory;

#[derive(Debug, Clone, Error)]
pub enum InventoryError {
    #[error("inventory call timed out after {0:?}")]
    Timeout(Duration),
    #[error("inventory is unavailable: {0}")]
    Unavailable(String),
    #[error("inventory rejected the request: {0}")]
    Rejected(String),
    #[error("inventory transport error: {0}")]
    Transport(String),
}

pub type InventoryResult<T> = Result<T, InventoryError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Availability {
    pub available: bool,
    pub assigned_seats: Vec<String>,
    pub remaining: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveGrant {
    pub hold_token: String,
    pub reserved_seats: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitOutcome {
    Committed,
    Expired,
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseOutcome {
    Released,
    NotFound,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReserveRequest {
    pub event_id: String,
    pub seat_ids: Vec<String>,
    pub quantity: u32,
    pub reservation_id: Uuid,
    pub user_id: String,
    pub hold_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitRequest {
    pub reservation_id: Uuid,
    pub event_id: String,
    pub seat_ids: Vec<String>,
    pub hold_token: String,
    pub payment_intent_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub reservation_id: Uuid,
    pub event_id: String,
    pub seat_ids: Vec<String>,
    pub hold_token: String,
}

#[async_trait]
pub trait InventoryApi: Send + Sync {
    /// Read-only; safe to retry within the request budget.
    async fn check_availability(
        &self,
        ctx: &RequestContext,
        event_id: &str,
        quantity: u32,
        seat_ids: &[String],
    ) -> InventoryResult<Availability>;

    /// Mutating, single-shot. Inventory dedupes by reservation id.
    async fn reserve_seats(
        &self,
        ctx: &RequestContext,
        request: &ReserveRequest,
    ) -> InventoryResult<ReserveGrant>;

    /// Mutating, single-shot.
    async fn commit(
        &self,
        ctx: &RequestContext,
        request: &CommitRequest,
    ) -> InventoryResult<CommitOutcome>;

    /// Idempotent by hold token; bounded retries allowed.
    async fn release(
        &self,
        ctx: &RequestContext,
        request: &ReleaseRequest,
    ) -> InventoryResult<ReleaseOutcome>;
}

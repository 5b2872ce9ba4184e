/// Error taxonomy for the reservation core
///
/// The state machine is the classification point: lower layers raise their own
/// kinded errors and are mapped into `CoreError` there. Transport adapters map
/// the `code()` to their status tables.
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // Client faults
    #[error("idempotency key is required for mutating operations")]
    IdempotencyRequired,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("reservation not found")]
    ReservationNotFound,
    #[error("caller does not own this reservation")]
    Forbidden,

    // Business conflicts
    #[error("idempotency key was reused with a different request body")]
    IdempotencyConflict,
    #[error("reservation hold has expired")]
    ReservationExpired,
    #[error("requested seats are unavailable")]
    SeatUnavailable,
    #[error("inventory rejected the operation: {0}")]
    InventoryConflict(String),
    #[error("operation not allowed in the current state: {0}")]
    InvalidState(String),

    // Transient infrastructure
    #[error("upstream call exceeded its deadline")]
    UpstreamTimeout,
    #[error("upstream dependency is unavailable")]
    UpstreamUnavailable,
    #[error("transient storage failure: {0}")]
    StoreTransient(String),

    // Fatal
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable wire code for the transport layer and cached snapshots.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::IdempotencyRequired => "IDEMPOTENCY_REQUIRED",
            CoreError::InvalidRequest(_) => "INVALID_REQUEST",
            CoreError::ReservationNotFound => "RESERVATION_NOT_FOUND",
            CoreError::Forbidden => "FORBIDDEN",
            CoreError::IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
            CoreError::ReservationExpired => "RESERVATION_EXPIRED",
            CoreError::SeatUnavailable => "SEAT_UNAVAILABLE",
            CoreError::InventoryConflict(_) => "INVENTORY_CONFLICT",
            CoreError::InvalidState(_) => "INVALID_STATE",
            CoreError::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            CoreError::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            CoreError::StoreTransient(_) => "STORE_TRANSIENT",
            CoreError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Retryable by the caller; never cached by the idempotency layer.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::UpstreamTimeout
                | CoreError::UpstreamUnavailable
                | CoreError::StoreTransient(_)
                | CoreError::Internal(_)
        )
    }

    /// Business outcomes the idempotency layer snapshots, so retried
    /// conflicts replay identically.
    pub fn is_cacheable(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidRequest(_)
                | CoreError::ReservationNotFound
                | CoreError::Forbidden
                | CoreError::ReservationExpired
                | CoreError::SeatUnavailable
                | CoreError::InventoryConflict(_)
                | CoreError::InvalidState(_)
        )
    }

    pub fn body(&self, trace_id: &str) -> ErrorBody {
        ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
            trace_id: trace_id.to_string(),
        }
    }

    /// Rebuild an error from a cached snapshot body.
    pub fn from_body(body: &ErrorBody) -> Self {
        match body.code.as_str() {
            "IDEMPOTENCY_REQUIRED" => CoreError::IdempotencyRequired,
            "INVALID_REQUEST" => CoreError::InvalidRequest(body.message.clone()),
            "RESERVATION_NOT_FOUND" => CoreError::ReservationNotFound,
            "FORBIDDEN" => CoreError::Forbidden,
            "IDEMPOTENCY_CONFLICT" => CoreError::IdempotencyConflict,
            "RESERVATION_EXPIRED" => CoreError::ReservationExpired,
            "SEAT_UNAVAILABLE" => CoreError::SeatUnavailable,
            "INVENTORY_CONFLICT" => CoreError::InventoryConflict(body.message.clone()),
            "INVALID_STATE" => CoreError::InvalidState(body.message.clone()),
            "UPSTREAM_TIMEOUT" => CoreError::UpstreamTimeout,
            "UPSTREAM_UNAVAILABLE" => CoreError::UpstreamUnavailable,
            "STORE_TRANSIENT" => CoreError::StoreTransient(body.message.clone()),
            _ => CoreError::Internal(body.message.clone()),
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Transient(msg) => CoreError::StoreTransient(msg),
            StoreError::Corrupt(msg) => CoreError::Internal(msg),
        }
    }
}

/// User-visible error shape: `{error: {code, message, trace_id}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub trace_id: String,
}

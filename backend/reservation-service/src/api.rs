/// Transport-agnostic inbound surface
///
/// `ReservationApi` is what an HTTP or gRPC adapter calls: it enforces the
/// idempotency contract around the state machine's mutating operations.
/// Reads bypass the idempotency layer.
use crate::context::RequestContext;
use crate::error::CoreResult;
use crate::idempotency::IdempotencyManager;
use crate::models::{OrderStatus, Reservation, ReservationStatus};
use crate::reservation::ReservationCore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateReservationRequest {
    pub event_id: String,
    pub quantity: u32,
    /// Empty means inventory assigns the seats
    #[serde(default)]
    pub seat_ids: Vec<String>,
    /// Admission token from the waiting-room gateway; carried opaquely
    #[serde(default)]
    pub reservation_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateReservationResponse {
    pub reservation_id: Uuid,
    pub status: ReservationStatus,
    pub hold_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmReservationRequest {
    pub reservation_id: Uuid,
    pub payment_intent_id: String,
    /// Order amount in minor units, carried opaquely from the payment context
    #[serde(default)]
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmReservationResponse {
    pub order_id: Uuid,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelReservationRequest {
    pub reservation_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelReservationResponse {
    pub status: ReservationStatus,
}

pub struct ReservationApi {
    core: Arc<ReservationCore>,
    idempotency: IdempotencyManager,
}

impl ReservationApi {
    pub fn new(core: Arc<ReservationCore>, idempotency: IdempotencyManager) -> Self {
        Self { core, idempotency }
    }

    pub async fn create_reservation(
        &self,
        ctx: &RequestContext,
        idempotency_key: Option<&str>,
        request: &CreateReservationRequest,
    ) -> CoreResult<CreateReservationResponse> {
        let key = idempotency_key.unwrap_or_default().to_string();
        self.idempotency
            .execute(ctx, idempotency_key, request, || self.core.create(ctx, request, key))
            .await
    }

    pub async fn get_reservation(
        &self,
        ctx: &RequestContext,
        reservation_id: Uuid,
    ) -> CoreResult<Reservation> {
        self.core.get(ctx, reservation_id).await
    }

    pub async fn confirm_reservation(
        &self,
        ctx: &RequestContext,
        idempotency_key: Option<&str>,
        request: &ConfirmReservationRequest,
    ) -> CoreResult<ConfirmReservationResponse> {
        self.idempotency
            .execute(ctx, idempotency_key, request, || self.core.confirm(ctx, request))
            .await
    }

    pub async fn cancel_reservation(
        &self,
        ctx: &RequestContext,
        idempotency_key: Option<&str>,
        request: &CancelReservationRequest,
    ) -> CoreResult<CancelReservationResponse> {
        self.idempotency
            .execute(ctx, idempotency_key, request, || self.core.cancel(ctx, request))
            .await
    }
}

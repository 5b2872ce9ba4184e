/// Reservation state machine
///
/// Orchestrates inventory coordination and conditional persistence for the
/// hold lifecycle:
///
/// ```text
///           create()                 confirm()
///    ∅ ─────────────▶ HOLD ───────────────────▶ CONFIRMED  (terminal)
///                     │  cancel()
///                     ├────────────▶ CANCELLED (terminal)
///                     │  deadline elapsed
///                     └────────────▶ EXPIRED    (terminal)
/// ```
///
/// Every transition out of HOLD is a conditional write predicated on the row
/// still being HOLD, co-committed with its outbox event. That write is the
/// single arbiter for races between confirm, cancel, and expiry.
use crate::api::{
    CancelReservationRequest, CancelReservationResponse, ConfirmReservationRequest,
    ConfirmReservationResponse, CreateReservationRequest, CreateReservationResponse,
};
use crate::context::RequestContext;
use crate::error::{CoreError, CoreResult};
use crate::events::EventType;
use crate::expiry::ExpiryRegistrar;
use crate::inventory::{
    CommitOutcome, CommitRequest, InventoryApi, InventoryError, ReleaseRequest, ReserveRequest,
};
use crate::models::{Order, OrderStatus, Reservation, ReservationStatus};
use crate::outbox::RELEASE_TASK;
use crate::store::{tables, StoreGateway, Table, TxnOutcome, WriteItem};
use chrono::Duration as ChronoDuration;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use transactional_outbox::{Clock, OutboxEntry};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CoreSettings {
    /// Hold window granted to a fresh reservation
    pub hold_duration: Duration,
    /// Budget for internally-originated work (expiry, compensation)
    pub internal_budget: Duration,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            hold_duration: Duration::from_secs(60),
            internal_budget: Duration::from_millis(600),
        }
    }
}

pub struct ReservationCore {
    store: Arc<dyn StoreGateway>,
    inventory: Arc<dyn InventoryApi>,
    clock: Arc<dyn Clock>,
    expiry: Arc<dyn ExpiryRegistrar>,
    settings: CoreSettings,
}

impl ReservationCore {
    pub fn new(
        store: Arc<dyn StoreGateway>,
        inventory: Arc<dyn InventoryApi>,
        clock: Arc<dyn Clock>,
        expiry: Arc<dyn ExpiryRegistrar>,
        settings: CoreSettings,
    ) -> Self {
        Self { store, inventory, clock, expiry, settings }
    }

    pub async fn create(
        &self,
        ctx: &RequestContext,
        request: &CreateReservationRequest,
        idempotency_key: String,
    ) -> CoreResult<CreateReservationResponse> {
        validate_create(request)?;

        let availability = self
            .inventory
            .check_availability(ctx, &request.event_id, request.quantity, &request.seat_ids)
            .await
            .map_err(map_inventory_error)?;

        let requested_seats = if request.seat_ids.is_empty() {
            availability.assigned_seats.clone()
        } else {
            request.seat_ids.clone()
        };
        if !availability.available || requested_seats.is_empty() {
            return Err(CoreError::SeatUnavailable);
        }

        // A generated id colliding with an existing row aborts the batch;
        // retry once with a fresh id.
        for _ in 0..2 {
            let reservation_id = Uuid::new_v4();
            let now = self.clock.now();
            let hold_expires_at = now
                + ChronoDuration::from_std(self.settings.hold_duration)
                    .unwrap_or(ChronoDuration::seconds(60));

            let grant = self
                .inventory
                .reserve_seats(
                    ctx,
                    &ReserveRequest {
                        event_id: request.event_id.clone(),
                        seat_ids: requested_seats.clone(),
                        quantity: request.quantity,
                        reservation_id,
                        user_id: ctx.user_id.clone(),
                        hold_seconds: self.settings.hold_duration.as_secs(),
                    },
                )
                .await
                .map_err(map_inventory_error)?;

            // The granted list replaces whatever the caller asked for.
            let seat_ids = if grant.reserved_seats.is_empty() {
                requested_seats.clone()
            } else {
                grant.reserved_seats.clone()
            };

            let reservation = Reservation {
                reservation_id,
                event_id: request.event_id.clone(),
                user_id: ctx.user_id.clone(),
                quantity: request.quantity,
                seat_ids,
                status: ReservationStatus::Hold,
                hold_expires_at: Some(hold_expires_at),
                hold_token: grant.hold_token,
                order_id: None,
                idempotency_key: idempotency_key.clone(),
                created_at: now,
                updated_at: now,
            };

            let entry = OutboxEntry::new(
                reservation_id.to_string(),
                EventType::ReservationCreated.as_str(),
                created_detail(&reservation),
                ctx.trace_id.as_str(),
                now,
            );
            let items = vec![
                WriteItem::PutIfAbsent {
                    table: Table::Reservations,
                    row: tables::reservation_row(&reservation)?,
                },
                WriteItem::PutIfAbsent { table: Table::Outbox, row: tables::outbox_row(&entry)? },
            ];

            match self.store.transactional_write(items).await {
                Ok(TxnOutcome::Committed) => {
                    self.expiry.register(reservation_id, hold_expires_at);
                    info!(
                        reservation_id = %reservation_id,
                        event_id = %request.event_id,
                        quantity = request.quantity,
                        trace_id = %ctx.trace_id,
                        "reservation held"
                    );
                    return Ok(CreateReservationResponse {
                        reservation_id,
                        status: ReservationStatus::Hold,
                        hold_expires_at,
                    });
                }
                Ok(TxnOutcome::Aborted) => {
                    warn!(reservation_id = %reservation_id, "reservation id collision, retrying");
                    self.release_best_effort(ctx, &reservation).await;
                    continue;
                }
                Err(e) => {
                    // Reserve succeeded but persistence did not: compensate so
                    // the hold does not linger for the full inventory TTL.
                    self.release_best_effort(ctx, &reservation).await;
                    return Err(e.into());
                }
            }
        }

        Err(CoreError::Internal("could not persist a unique reservation".into()))
    }

    pub async fn get(&self, _ctx: &RequestContext, reservation_id: Uuid) -> CoreResult<Reservation> {
        self.load(reservation_id).await?.ok_or(CoreError::ReservationNotFound)
    }

    pub async fn confirm(
        &self,
        ctx: &RequestContext,
        request: &ConfirmReservationRequest,
    ) -> CoreResult<ConfirmReservationResponse> {
        let reservation =
            self.load(request.reservation_id).await?.ok_or(CoreError::ReservationNotFound)?;
        if reservation.user_id != ctx.user_id {
            return Err(CoreError::Forbidden);
        }

        match reservation.status {
            ReservationStatus::Confirmed => return confirmed_response(&reservation),
            ReservationStatus::Cancelled | ReservationStatus::Expired => {
                return Err(CoreError::ReservationExpired)
            }
            ReservationStatus::Hold => {}
        }

        let now = self.clock.now();
        let hold_expires_at = reservation
            .hold_expires_at
            .ok_or_else(|| CoreError::Internal("hold without an expiry instant".into()))?;
        if hold_expires_at - now < ChronoDuration::milliseconds(1) {
            let _ = self.apply_expire(ctx, &reservation).await;
            return Err(CoreError::ReservationExpired);
        }

        match self
            .inventory
            .commit(
                ctx,
                &CommitRequest {
                    reservation_id: reservation.reservation_id,
                    event_id: reservation.event_id.clone(),
                    seat_ids: reservation.seat_ids.clone(),
                    hold_token: reservation.hold_token.clone(),
                    payment_intent_id: request.payment_intent_id.clone(),
                },
            )
            .await
        {
            Ok(CommitOutcome::Committed) => {}
            Ok(CommitOutcome::Expired) | Ok(CommitOutcome::Conflict) => {
                let _ = self.apply_expire(ctx, &reservation).await;
                return Err(CoreError::InventoryConflict(
                    "inventory could not commit the hold".into(),
                ));
            }
            Err(e) => return Err(map_inventory_error(e)),
        }

        let order = Order {
            order_id: Uuid::new_v4(),
            reservation_id: reservation.reservation_id,
            event_id: reservation.event_id.clone(),
            user_id: reservation.user_id.clone(),
            amount: request.amount,
            status: OrderStatus::Confirmed,
            payment_intent_id: request.payment_intent_id.clone(),
            created_at: now,
            updated_at: now,
        };

        let mut confirmed = reservation.clone();
        confirmed.status = ReservationStatus::Confirmed;
        confirmed.hold_expires_at = None;
        confirmed.order_id = Some(order.order_id);
        confirmed.updated_at = now;

        let entry = OutboxEntry::new(
            confirmed.reservation_id.to_string(),
            EventType::ReservationConfirmed.as_str(),
            confirmed_detail(&confirmed, &order),
            ctx.trace_id.as_str(),
            now,
        );
        let items = vec![
            WriteItem::ConditionalUpdate {
                table: Table::Reservations,
                row: tables::reservation_row(&confirmed)?,
                expected_status: ReservationStatus::Hold.as_str().to_string(),
            },
            WriteItem::PutIfAbsent { table: Table::Orders, row: tables::order_row(&order)? },
            WriteItem::PutIfAbsent { table: Table::Outbox, row: tables::outbox_row(&entry)? },
        ];

        match self.store.transactional_write(items).await? {
            TxnOutcome::Committed => {
                info!(
                    reservation_id = %confirmed.reservation_id,
                    order_id = %order.order_id,
                    trace_id = %ctx.trace_id,
                    "reservation confirmed"
                );
                Ok(ConfirmReservationResponse {
                    order_id: order.order_id,
                    status: OrderStatus::Confirmed,
                })
            }
            TxnOutcome::Aborted => {
                // Lost the race against expiry or a concurrent confirm.
                let current = self
                    .load(request.reservation_id)
                    .await?
                    .ok_or(CoreError::ReservationNotFound)?;
                match current.status {
                    ReservationStatus::Confirmed => confirmed_response(&current),
                    ReservationStatus::Cancelled | ReservationStatus::Expired => {
                        Err(CoreError::ReservationExpired)
                    }
                    ReservationStatus::Hold => {
                        Err(CoreError::StoreTransient("conditional write aborted".into()))
                    }
                }
            }
        }
    }

    pub async fn cancel(
        &self,
        ctx: &RequestContext,
        request: &CancelReservationRequest,
    ) -> CoreResult<CancelReservationResponse> {
        let reservation =
            self.load(request.reservation_id).await?.ok_or(CoreError::ReservationNotFound)?;
        if reservation.user_id != ctx.user_id {
            return Err(CoreError::Forbidden);
        }

        match reservation.status {
            ReservationStatus::Cancelled => {
                return Ok(CancelReservationResponse { status: ReservationStatus::Cancelled })
            }
            ReservationStatus::Expired => return Err(CoreError::ReservationExpired),
            ReservationStatus::Confirmed => {
                return Err(CoreError::InvalidState(
                    "confirmed reservations are settled through the order lifecycle".into(),
                ))
            }
            ReservationStatus::Hold => {}
        }

        match self.inventory.release(ctx, &release_request(&reservation)).await {
            Ok(_) => {} // a hold already freed upstream reports not_found; both are fine
            Err(InventoryError::Timeout(_)) => return Err(CoreError::UpstreamTimeout),
            Err(e) => {
                warn!(
                    reservation_id = %reservation.reservation_id,
                    error = %e,
                    "release failed, queueing a retriable release and cancelling locally"
                );
                self.enqueue_release(ctx, &reservation).await;
            }
        }

        let now = self.clock.now();
        let mut cancelled = reservation.clone();
        cancelled.status = ReservationStatus::Cancelled;
        cancelled.hold_expires_at = None;
        cancelled.updated_at = now;

        let entry = OutboxEntry::new(
            cancelled.reservation_id.to_string(),
            EventType::ReservationCancelled.as_str(),
            terminal_detail(&cancelled),
            ctx.trace_id.as_str(),
            now,
        );
        let items = vec![
            WriteItem::ConditionalUpdate {
                table: Table::Reservations,
                row: tables::reservation_row(&cancelled)?,
                expected_status: ReservationStatus::Hold.as_str().to_string(),
            },
            WriteItem::PutIfAbsent { table: Table::Outbox, row: tables::outbox_row(&entry)? },
        ];

        match self.store.transactional_write(items).await? {
            TxnOutcome::Committed => {
                info!(
                    reservation_id = %cancelled.reservation_id,
                    trace_id = %ctx.trace_id,
                    "reservation cancelled"
                );
                Ok(CancelReservationResponse { status: ReservationStatus::Cancelled })
            }
            TxnOutcome::Aborted => {
                let current = self
                    .load(request.reservation_id)
                    .await?
                    .ok_or(CoreError::ReservationNotFound)?;
                match current.status {
                    ReservationStatus::Cancelled => {
                        Ok(CancelReservationResponse { status: ReservationStatus::Cancelled })
                    }
                    ReservationStatus::Expired => Err(CoreError::ReservationExpired),
                    ReservationStatus::Confirmed => Err(CoreError::InvalidState(
                        "confirmed reservations are settled through the order lifecycle".into(),
                    )),
                    ReservationStatus::Hold => {
                        Err(CoreError::StoreTransient("conditional write aborted".into()))
                    }
                }
            }
        }
    }

    /// Expire a hold whose deadline has passed. Invoked by the expiry workers;
    /// duplicate fires and already-settled reservations are no-ops.
    pub async fn expire(&self, reservation_id: Uuid) -> CoreResult<()> {
        let Some(reservation) = self.load(reservation_id).await? else {
            return Ok(());
        };
        if reservation.status != ReservationStatus::Hold {
            return Ok(());
        }
        let now = self.clock.now();
        if reservation.hold_expires_at.is_some_and(|at| now < at) {
            return Ok(());
        }

        let ctx = RequestContext::internal(self.settings.internal_budget);
        if self.apply_expire(&ctx, &reservation).await? {
            info!(reservation_id = %reservation_id, "hold expired");
        }
        Ok(())
    }

    /// HOLD → EXPIRED with best-effort release. Returns whether this caller
    /// won the transition.
    async fn apply_expire(
        &self,
        ctx: &RequestContext,
        reservation: &Reservation,
    ) -> CoreResult<bool> {
        self.release_best_effort(ctx, reservation).await;

        let now = self.clock.now();
        let mut expired = reservation.clone();
        expired.status = ReservationStatus::Expired;
        expired.hold_expires_at = None;
        expired.updated_at = now;

        let entry = OutboxEntry::new(
            expired.reservation_id.to_string(),
            EventType::ReservationExpired.as_str(),
            terminal_detail(&expired),
            ctx.trace_id.as_str(),
            now,
        );
        let items = vec![
            WriteItem::ConditionalUpdate {
                table: Table::Reservations,
                row: tables::reservation_row(&expired)?,
                expected_status: ReservationStatus::Hold.as_str().to_string(),
            },
            WriteItem::PutIfAbsent { table: Table::Outbox, row: tables::outbox_row(&entry)? },
        ];

        match self.store.transactional_write(items).await? {
            TxnOutcome::Committed => Ok(true),
            TxnOutcome::Aborted => Ok(false),
        }
    }

    /// Release now if inventory answers; otherwise fall back to a queued
    /// release task.
    async fn release_best_effort(&self, ctx: &RequestContext, reservation: &Reservation) {
        if let Err(e) = self.inventory.release(ctx, &release_request(reservation)).await {
            warn!(
                reservation_id = %reservation.reservation_id,
                error = %e,
                "release failed, queueing a retriable release"
            );
            self.enqueue_release(ctx, reservation).await;
        }
    }

    /// Durable fallback for a failed release: an outbox task row the drainer
    /// executes against inventory under its normal retry schedule.
    async fn enqueue_release(&self, ctx: &RequestContext, reservation: &Reservation) {
        let payload = match serde_json::to_value(release_request(reservation)) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    reservation_id = %reservation.reservation_id,
                    error = %e,
                    "release task could not be serialized"
                );
                return;
            }
        };
        let entry = OutboxEntry::new(
            reservation.reservation_id.to_string(),
            RELEASE_TASK,
            payload,
            ctx.trace_id.as_str(),
            self.clock.now(),
        );
        let row = match tables::outbox_row(&entry) {
            Ok(row) => row,
            Err(e) => {
                warn!(
                    reservation_id = %reservation.reservation_id,
                    error = %e,
                    "release task could not be encoded"
                );
                return;
            }
        };
        if let Err(e) = self.store.put_if_absent(Table::Outbox, row).await {
            warn!(
                reservation_id = %reservation.reservation_id,
                error = %e,
                "release task could not be queued"
            );
        }
    }

    async fn load(&self, reservation_id: Uuid) -> CoreResult<Option<Reservation>> {
        let row = self
            .store
            .get(Table::Reservations, &reservation_id.to_string(), tables::RESERVATION_SK)
            .await?;
        row.map(|r| tables::decode_reservation(&r).map_err(CoreError::from)).transpose()
    }
}

fn validate_create(request: &CreateReservationRequest) -> CoreResult<()> {
    if request.event_id.trim().is_empty() {
        return Err(CoreError::InvalidRequest("event_id must not be empty".into()));
    }
    if !(1..=10).contains(&request.quantity) {
        return Err(CoreError::InvalidRequest("quantity must be between 1 and 10".into()));
    }
    if !request.seat_ids.is_empty() && request.seat_ids.len() != request.quantity as usize {
        return Err(CoreError::InvalidRequest("seat_ids must match quantity".into()));
    }
    Ok(())
}

fn confirmed_response(reservation: &Reservation) -> CoreResult<ConfirmReservationResponse> {
    reservation
        .order_id
        .map(|order_id| ConfirmReservationResponse { order_id, status: OrderStatus::Confirmed })
        .ok_or_else(|| CoreError::Internal("confirmed reservation without an order".into()))
}

fn release_request(reservation: &Reservation) -> ReleaseRequest {
    ReleaseRequest {
        reservation_id: reservation.reservation_id,
        event_id: reservation.event_id.clone(),
        seat_ids: reservation.seat_ids.clone(),
        hold_token: reservation.hold_token.clone(),
    }
}

fn map_inventory_error(error: InventoryError) -> CoreError {
    match error {
        InventoryError::Timeout(_) => CoreError::UpstreamTimeout,
        InventoryError::Unavailable(_) | InventoryError::Transport(_) => {
            CoreError::UpstreamUnavailable
        }
        InventoryError::Rejected(message) => CoreError::InventoryConflict(message),
    }
}

fn created_detail(reservation: &Reservation) -> serde_json::Value {
    json!({
        "reservation_id": reservation.reservation_id,
        "event_id": reservation.event_id,
        "user_id": reservation.user_id,
        "status": reservation.status,
        "quantity": reservation.quantity,
        "seat_ids": reservation.seat_ids,
        "hold_expires_at": reservation.hold_expires_at,
    })
}

fn confirmed_detail(reservation: &Reservation, order: &Order) -> serde_json::Value {
    json!({
        "reservation_id": reservation.reservation_id,
        "event_id": reservation.event_id,
        "user_id": reservation.user_id,
        "status": reservation.status,
        "order_id": order.order_id,
        "amount": order.amount,
        "payment_intent_id": order.payment_intent_id,
        "seat_ids": reservation.seat_ids,
    })
}

/// Detail for CANCELLED and EXPIRED.
fn terminal_detail(reservation: &Reservation) -> serde_json::Value {
    json!({
        "reservation_id": reservation.reservation_id,
        "event_id": reservation.event_id,
        "user_id": reservation.user_id,
        "status": reservation.status,
        "seat_ids": reservation.seat_ids,
        "hold_token": reservation.hold_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_request(quantity: u32, seat_ids: Vec<String>) -> CreateReservationRequest {
        CreateReservationRequest {
            event_id: "evt-1".into(),
            quantity,
            seat_ids,
            reservation_token: None,
        }
    }

    #[test]
    fn quantity_bounds_are_enforced() {
        assert!(validate_create(&create_request(0, vec![])).is_err());
        assert!(validate_create(&create_request(11, vec![])).is_err());
        assert!(validate_create(&create_request(1, vec![])).is_ok());
        assert!(validate_create(&create_request(10, vec![])).is_ok());
    }

    #[test]
    fn seat_list_must_match_quantity_when_present() {
        assert!(validate_create(&create_request(2, vec!["A-1".into()])).is_err());
        assert!(validate_create(&create_request(2, vec!["A-1".into(), "A-2".into()])).is_ok());
    }

    #[test]
    fn empty_event_id_is_invalid() {
        let request = CreateReservationRequest {
            event_id: "  ".into(),
            quantity: 1,
            seat_ids: vec![],
            reservation_token: None,
        };
        assert!(matches!(validate_create(&request), Err(CoreError::InvalidRequest(_))));
    }
}

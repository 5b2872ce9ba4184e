/// Outbox durability over the gateway store: rows survive a dead drainer,
/// publish exactly once, parked failures can be requeued by an operator, and
/// failed inventory releases drain as retriable tasks.
mod common;

use common::Harness;
use reservation_service::inventory::{InventoryError, ReleaseOutcome};
use reservation_service::models::ReservationStatus;
use reservation_service::outbox::GatewayOutboxStore;
use reservation_service::Clock;
use reservation_service::store::{tables, StoreGateway, Table};
use std::sync::Arc;
use transactional_outbox::{OutboxEntry, OutboxStatus, OutboxStore};

#[tokio::test]
async fn rows_written_before_a_crash_publish_on_restart() {
    let h = Harness::new();
    let ctx = h.ctx();

    // Confirm completes while the drainer is "down" (never ran).
    let created = h.api.create_reservation(&ctx, Some("K1"), &h.create_request()).await.unwrap();
    h.api
        .confirm_reservation(&ctx, Some("K2"), &h.confirm_request(created.reservation_id))
        .await
        .unwrap();

    assert!(h.sink.events().is_empty());
    assert!(h.outbox_statuses().iter().all(|(_, status)| status == "PENDING"));

    // "Restart": the drainer scans and publishes everything it finds.
    let report = h.drainer.drain_once().await.unwrap();
    assert_eq!(report.published, 2);
    assert_eq!(
        h.sink.types_for(&created.reservation_id.to_string()),
        vec!["RESERVATION_CREATED", "RESERVATION_CONFIRMED"]
    );
    assert!(h.outbox_statuses().iter().all(|(_, status)| status == "PUBLISHED"));

    // Published rows are never re-delivered.
    let report = h.drainer.drain_once().await.unwrap();
    assert_eq!(report.scanned, 0);
    assert_eq!(h.sink.events().len(), 2);
}

#[tokio::test]
async fn envelopes_carry_the_event_contract_fields() {
    let h = Harness::new();
    let ctx = h.ctx();

    let created = h.api.create_reservation(&ctx, Some("K1"), &h.create_request()).await.unwrap();
    h.drainer.drain_once().await.unwrap();

    let events = h.sink.events();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.source, "ticketline.reservation-service");
    assert_eq!(event.event_type, "RESERVATION_CREATED");
    assert_eq!(event.trace_id, ctx.trace_id);
    assert_eq!(event.detail["reservation_id"], created.reservation_id.to_string());
    assert_eq!(event.detail["event_id"], "E1");
    assert_eq!(event.detail["user_id"], common::USER);
}

#[tokio::test]
async fn rows_for_evicted_aggregates_still_publish() {
    let h = Harness::new();

    // An outbox row whose aggregate no longer exists anywhere.
    let entry = OutboxEntry::new(
        "ghost-reservation",
        "RESERVATION_EXPIRED",
        serde_json::json!({
            "reservation_id": "ghost-reservation",
            "event_id": "E9",
            "user_id": "user-9",
        }),
        "trace-ghost",
        h.clock.now(),
    );
    h.flaky
        .put_if_absent(Table::Outbox, tables::outbox_row(&entry).unwrap())
        .await
        .unwrap();

    let report = h.drainer.drain_once().await.unwrap();
    assert_eq!(report.published, 1);
    assert_eq!(h.sink.types_for("ghost-reservation"), vec!["RESERVATION_EXPIRED"]);
}

#[tokio::test]
async fn failed_release_is_queued_and_retried_by_the_drainer() {
    let h = Harness::new();
    let ctx = h.ctx();

    let created = h.api.create_reservation(&ctx, Some("K1"), &h.create_request()).await.unwrap();

    // Inventory is unreachable when the user cancels; cancellation still
    // completes locally and the release parks as an outbox task.
    h.inventory.fail_next_release(InventoryError::Unavailable("circuit open".into()));
    let cancelled = h
        .api
        .cancel_reservation(&ctx, Some("K2"), &h.cancel_request(created.reservation_id))
        .await
        .unwrap();
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);
    assert_eq!(h.inventory.release_calls(), 1);
    assert!(h
        .outbox_statuses()
        .iter()
        .any(|(t, s)| t == "INVENTORY_RELEASE_REQUESTED" && s == "PENDING"));

    // The drainer executes the task against inventory, not the bus. A hold
    // already freed upstream completes the task too.
    h.inventory.set_release_outcome(ReleaseOutcome::NotFound);
    let report = h.drainer.drain_once().await.unwrap();
    assert_eq!(report.published, 3);
    assert_eq!(h.inventory.release_calls(), 2);
    assert!(h.outbox_statuses().iter().all(|(_, s)| s == "PUBLISHED"));

    assert!(h.sink.events().iter().all(|e| e.event_type != "INVENTORY_RELEASE_REQUESTED"));
    assert_eq!(
        h.sink.types_for(&created.reservation_id.to_string()),
        vec!["RESERVATION_CREATED", "RESERVATION_CANCELLED"]
    );
}

#[tokio::test]
async fn release_task_failures_follow_the_retry_schedule() {
    let h = Harness::new();
    let ctx = h.ctx();

    let created = h.api.create_reservation(&ctx, Some("K1"), &h.create_request()).await.unwrap();
    h.inventory.fail_next_release(InventoryError::Transport("reset".into()));
    h.api
        .cancel_reservation(&ctx, Some("K2"), &h.cancel_request(created.reservation_id))
        .await
        .unwrap();

    // The task fails its first drain attempt and is rescheduled.
    h.inventory.fail_next_release(InventoryError::Transport("reset".into()));
    h.drainer.drain_once().await.unwrap();
    assert!(h
        .outbox_statuses()
        .iter()
        .any(|(t, s)| t == "INVENTORY_RELEASE_REQUESTED" && s == "FAILED"));

    // Due again after the backoff window; this attempt succeeds.
    h.clock.advance(chrono::Duration::seconds(31));
    h.drainer.drain_once().await.unwrap();
    assert!(h.outbox_statuses().iter().all(|(_, s)| s == "PUBLISHED"));
    assert_eq!(h.inventory.release_calls(), 3);
}

#[tokio::test]
async fn parked_rows_are_invisible_until_requeued() {
    let h = Harness::new();

    let mut entry = OutboxEntry::new(
        "rsv-parked",
        "RESERVATION_CANCELLED",
        serde_json::json!({"reservation_id": "rsv-parked"}),
        "trace-parked",
        h.clock.now(),
    );
    entry.status = OutboxStatus::Failed;
    entry.attempts = 5;
    entry.next_retry_at = None;
    entry.last_error = Some("bus unreachable".into());
    h.flaky
        .put_if_absent(Table::Outbox, tables::outbox_row(&entry).unwrap())
        .await
        .unwrap();

    let report = h.drainer.drain_once().await.unwrap();
    assert_eq!(report.scanned, 0);

    let outbox_store =
        GatewayOutboxStore::new(h.flaky.clone() as Arc<dyn StoreGateway>, h.clock.clone());
    assert_eq!(outbox_store.requeue_failed(10).await.unwrap(), 1);

    let report = h.drainer.drain_once().await.unwrap();
    assert_eq!(report.published, 1);
    assert_eq!(h.sink.types_for("rsv-parked"), vec!["RESERVATION_CANCELLED"]);
}

/// Expiry semantics: the backstop sweeper, exactly-once expiration, and the
/// race between expiry and confirmation arbitrated by the conditional write.
mod common;

use chrono::Duration as ChronoDuration;
use common::Harness;
use reservation_service::error::CoreError;
use reservation_service::inventory::InventoryError;
use reservation_service::models::ReservationStatus;

#[tokio::test]
async fn sweeper_expires_due_holds_and_releases_seats() {
    let h = Harness::new();
    let ctx = h.ctx();

    let created = h.api.create_reservation(&ctx, Some("K1"), &h.create_request()).await.unwrap();
    let sweeper = h.sweeper();

    // Not due yet.
    assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
    assert_eq!(h.reservation(created.reservation_id).status, ReservationStatus::Hold);

    h.clock.set(created.hold_expires_at + ChronoDuration::seconds(1));
    assert_eq!(sweeper.sweep_once().await.unwrap(), 1);

    let reservation = h.reservation(created.reservation_id);
    assert_eq!(reservation.status, ReservationStatus::Expired);
    assert_eq!(reservation.hold_expires_at, None);
    assert_eq!(h.inventory.release_calls(), 1);

    h.drainer.drain_once().await.unwrap();
    assert_eq!(
        h.sink.types_for(&created.reservation_id.to_string()),
        vec!["RESERVATION_CREATED", "RESERVATION_EXPIRED"]
    );

    // Next pass finds nothing: no hold outlives its deadline plus one sweep.
    assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
}

#[tokio::test]
async fn duplicate_expire_fires_are_no_ops() {
    let h = Harness::new();
    let ctx = h.ctx();

    let created = h.api.create_reservation(&ctx, Some("K1"), &h.create_request()).await.unwrap();
    h.clock.set(created.hold_expires_at);

    h.core.expire(created.reservation_id).await.unwrap();
    h.core.expire(created.reservation_id).await.unwrap();
    h.core.expire(created.reservation_id).await.unwrap();

    h.drainer.drain_once().await.unwrap();
    assert_eq!(
        h.sink.types_for(&created.reservation_id.to_string()),
        vec!["RESERVATION_CREATED", "RESERVATION_EXPIRED"]
    );
}

#[tokio::test]
async fn failed_release_during_expiry_is_queued_for_retry() {
    let h = Harness::new();
    let ctx = h.ctx();

    let created = h.api.create_reservation(&ctx, Some("K1"), &h.create_request()).await.unwrap();

    h.clock.set(created.hold_expires_at);
    h.inventory.fail_next_release(InventoryError::Transport("reset".into()));
    h.core.expire(created.reservation_id).await.unwrap();
    assert_eq!(h.reservation(created.reservation_id).status, ReservationStatus::Expired);
    assert!(h
        .outbox_statuses()
        .iter()
        .any(|(t, s)| t == "INVENTORY_RELEASE_REQUESTED" && s == "PENDING"));

    h.drainer.drain_once().await.unwrap();
    assert_eq!(h.inventory.release_calls(), 2);
    assert_eq!(
        h.sink.types_for(&created.reservation_id.to_string()),
        vec!["RESERVATION_CREATED", "RESERVATION_EXPIRED"]
    );
}

#[tokio::test]
async fn expire_before_the_deadline_does_nothing() {
    let h = Harness::new();
    let ctx = h.ctx();

    let created = h.api.create_reservation(&ctx, Some("K1"), &h.create_request()).await.unwrap();

    // A stray early fire must not expire a live hold.
    h.core.expire(created.reservation_id).await.unwrap();
    assert_eq!(h.reservation(created.reservation_id).status, ReservationStatus::Hold);
}

#[tokio::test]
async fn expiry_and_confirm_race_has_exactly_one_winner() {
    let h = Harness::new();
    let ctx = h.ctx();

    let created = h.api.create_reservation(&ctx, Some("K1"), &h.create_request()).await.unwrap();
    h.clock.set(created.hold_expires_at);

    let confirm_request = h.confirm_request(created.reservation_id);
    let (confirm_result, expire_result) = tokio::join!(
        h.api.confirm_reservation(&ctx, Some("K2"), &confirm_request),
        h.core.expire(created.reservation_id),
    );
    expire_result.unwrap();

    let reservation = h.reservation(created.reservation_id);
    h.drainer.drain_once().await.unwrap();
    let events = h.sink.types_for(&created.reservation_id.to_string());

    match reservation.status {
        ReservationStatus::Confirmed => {
            let response = confirm_result.unwrap();
            assert_eq!(h.orders().len(), 1);
            assert_eq!(h.orders()[0].order_id, response.order_id);
            assert_eq!(events, vec!["RESERVATION_CREATED", "RESERVATION_CONFIRMED"]);
        }
        ReservationStatus::Expired => {
            assert!(matches!(
                confirm_result,
                Err(CoreError::ReservationExpired) | Err(CoreError::InventoryConflict(_))
            ));
            assert!(h.orders().is_empty());
            assert_eq!(events, vec!["RESERVATION_CREATED", "RESERVATION_EXPIRED"]);
        }
        other => panic!("reservation ended in {other:?}"),
    }
}

#[tokio::test]
async fn expire_of_unknown_or_settled_reservations_is_benign() {
    let h = Harness::new();
    let ctx = h.ctx();

    // Unknown id.
    h.core.expire(uuid::Uuid::new_v4()).await.unwrap();

    // Already confirmed.
    let created = h.api.create_reservation(&ctx, Some("K1"), &h.create_request()).await.unwrap();
    h.api
        .confirm_reservation(&ctx, Some("K2"), &h.confirm_request(created.reservation_id))
        .await
        .unwrap();
    h.clock.set(created.hold_expires_at + ChronoDuration::seconds(5));
    h.core.expire(created.reservation_id).await.unwrap();

    assert_eq!(h.reservation(created.reservation_id).status, ReservationStatus::Confirmed);
    h.drainer.drain_once().await.unwrap();
    assert_eq!(
        h.sink.types_for(&created.reservation_id.to_string()),
        vec!["RESERVATION_CREATED", "RESERVATION_CONFIRMED"]
    );
}

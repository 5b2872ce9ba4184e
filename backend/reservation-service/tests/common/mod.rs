#![allow(dead_code)]

use chrono::{DateTime, Utc};
use reservation_service::api::{
    CancelReservationRequest, ConfirmReservationRequest, CreateReservationRequest, ReservationApi,
};
use reservation_service::context::RequestContext;
use reservation_service::events::{EnvelopePublisher, EventSink};
use reservation_service::expiry::{ExpirySweeper, NoopRegistrar};
use reservation_service::idempotency::IdempotencyManager;
use reservation_service::inventory::InventoryApi;
use reservation_service::models::{Order, Reservation};
use reservation_service::outbox::{GatewayOutboxStore, OutboxDispatcher};
use reservation_service::reservation::{CoreSettings, ReservationCore};
use reservation_service::store::{tables, MemoryStore, StoreGateway, Table};
use reservation_service::testsupport::{FakeInventory, FlakyStore, RecordingSink};
use reservation_service::{Clock, ManualClock};
use std::sync::Arc;
use std::time::Duration;
use transactional_outbox::{DrainerConfig, OutboxDrainer};
use uuid::Uuid;

pub const USER: &str = "user-1";

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub memory: Arc<MemoryStore>,
    pub flaky: Arc<FlakyStore>,
    pub inventory: Arc<FakeInventory>,
    pub sink: Arc<RecordingSink>,
    pub core: Arc<ReservationCore>,
    pub api: ReservationApi,
    pub drainer: OutboxDrainer<GatewayOutboxStore, OutboxDispatcher>,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(
            "2026-03-14T10:00:00Z".parse::<DateTime<Utc>>().unwrap(),
        ));
        let memory = Arc::new(MemoryStore::new(clock.clone()));
        let flaky = Arc::new(FlakyStore::new(memory.clone()));
        let gateway: Arc<dyn StoreGateway> = flaky.clone();
        let inventory = Arc::new(FakeInventory::new());

        let core = Arc::new(ReservationCore::new(
            gateway.clone(),
            inventory.clone() as Arc<dyn InventoryApi>,
            clock.clone(),
            Arc::new(NoopRegistrar),
            CoreSettings {
                hold_duration: Duration::from_secs(60),
                internal_budget: Duration::from_millis(600),
            },
        ));
        let idempotency =
            IdempotencyManager::new(gateway.clone(), clock.clone(), Duration::from_secs(300));
        let api = ReservationApi::new(core.clone(), idempotency);

        let sink = Arc::new(RecordingSink::new());
        let publisher = Arc::new(EnvelopePublisher::new(
            sink.clone() as Arc<dyn EventSink>,
            "ticketline.reservation-service",
        ));
        let dispatcher = Arc::new(OutboxDispatcher::new(
            publisher,
            inventory.clone() as Arc<dyn InventoryApi>,
            Duration::from_millis(600),
        ));
        let outbox_store = Arc::new(GatewayOutboxStore::new(gateway.clone(), clock.clone()));
        let drainer = OutboxDrainer::new(
            outbox_store,
            dispatcher,
            clock.clone() as Arc<dyn Clock>,
            DrainerConfig { poll_interval: Duration::from_millis(10), ..DrainerConfig::default() },
        );

        Self { clock, memory, flaky, inventory, sink, core, api, drainer }
    }

    pub fn ctx(&self) -> RequestContext {
        RequestContext::new(USER, Duration::from_millis(600))
    }

    pub fn ctx_for(&self, user_id: &str) -> RequestContext {
        RequestContext::new(user_id, Duration::from_millis(600))
    }

    pub fn create_request(&self) -> CreateReservationRequest {
        CreateReservationRequest {
            event_id: "E1".into(),
            quantity: 2,
            seat_ids: vec![],
            reservation_token: None,
        }
    }

    pub fn confirm_request(&self, reservation_id: Uuid) -> ConfirmReservationRequest {
        ConfirmReservationRequest {
            reservation_id,
            payment_intent_id: "P1".into(),
            amount: 12_000,
        }
    }

    pub fn cancel_request(&self, reservation_id: Uuid) -> CancelReservationRequest {
        CancelReservationRequest { reservation_id }
    }

    pub fn sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(
            self.flaky.clone(),
            self.core.clone(),
            self.clock.clone(),
            Duration::from_secs(15),
            100,
        )
    }

    pub fn reservations(&self) -> Vec<Reservation> {
        self.memory
            .dump(Table::Reservations)
            .iter()
            .map(|row| tables::decode_reservation(row).unwrap())
            .collect()
    }

    pub fn reservation(&self, reservation_id: Uuid) -> Reservation {
        self.reservations()
            .into_iter()
            .find(|r| r.reservation_id == reservation_id)
            .expect("reservation row exists")
    }

    pub fn orders(&self) -> Vec<Order> {
        self.memory
            .dump(Table::Orders)
            .iter()
            .map(|row| tables::decode_order(row).unwrap())
            .collect()
    }

    pub fn outbox_statuses(&self) -> Vec<(String, String)> {
        self.memory
            .dump(Table::Outbox)
            .iter()
            .map(|row| {
                let entry = tables::decode_outbox(row).unwrap();
                (entry.event_type, entry.status.as_str().to_string())
            })
            .collect()
    }
}

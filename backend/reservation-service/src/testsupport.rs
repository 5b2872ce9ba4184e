/// Hand-rolled fakes for the component seams, shared by the unit and
/// integration suites: a scriptable counting inventory, a recording event
/// sink, and a store wrapper that injects transient failures.
use crate::context::RequestContext;
use crate::events::{EventEnvelope, EventSink, SinkError};
use crate::inventory::{
    Availability, CommitOutcome, CommitRequest, InventoryApi, InventoryError, InventoryResult,
    ReleaseOutcome, ReleaseRequest, ReserveGrant, ReserveRequest,
};
use crate::store::{
    PutOutcome, ScanQuery, StoreError, StoreGateway, StoreResult, StoredRow, Table, TxnOutcome,
    UpdateOutcome, WriteItem,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct FakeInventoryState {
    available: bool,
    assign_empty: bool,
    fail_reserve: VecDeque<InventoryError>,
    fail_commit: VecDeque<InventoryError>,
    fail_release: VecDeque<InventoryError>,
    commit_outcome: Option<CommitOutcome>,
    release_outcome: Option<ReleaseOutcome>,
}

/// Counting inventory fake. Defaults to a healthy service with plenty of
/// seats; individual calls can be scripted to fail or return fixed outcomes.
pub struct FakeInventory {
    state: Mutex<FakeInventoryState>,
    check_calls: AtomicU32,
    reserve_calls: AtomicU32,
    commit_calls: AtomicU32,
    release_calls: AtomicU32,
}

impl Default for FakeInventory {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeInventory {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeInventoryState { available: true, ..Default::default() }),
            check_calls: AtomicU32::new(0),
            reserve_calls: AtomicU32::new(0),
            commit_calls: AtomicU32::new(0),
            release_calls: AtomicU32::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    /// available=true but with an empty assignment.
    pub fn set_assign_empty(&self, assign_empty: bool) {
        self.state.lock().assign_empty = assign_empty;
    }

    pub fn fail_next_reserve(&self, error: InventoryError) {
        self.state.lock().fail_reserve.push_back(error);
    }

    pub fn fail_next_commit(&self, error: InventoryError) {
        self.state.lock().fail_commit.push_back(error);
    }

    pub fn fail_next_release(&self, error: InventoryError) {
        self.state.lock().fail_release.push_back(error);
    }

    pub fn set_commit_outcome(&self, outcome: CommitOutcome) {
        self.state.lock().commit_outcome = Some(outcome);
    }

    pub fn set_release_outcome(&self, outcome: ReleaseOutcome) {
        self.state.lock().release_outcome = Some(outcome);
    }

    pub fn check_calls(&self) -> u32 {
        self.check_calls.load(Ordering::SeqCst)
    }

    pub fn reserve_calls(&self) -> u32 {
        self.reserve_calls.load(Ordering::SeqCst)
    }

    pub fn commit_calls(&self) -> u32 {
        self.commit_calls.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> u32 {
        self.release_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InventoryApi for FakeInventory {
    async fn check_availability(
        &self,
        _ctx: &RequestContext,
        _event_id: &str,
        quantity: u32,
        seat_ids: &[String],
    ) -> InventoryResult<Availability> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        if !state.available {
            return Ok(Availability { available: false, assigned_seats: vec![], remaining: 0 });
        }
        if state.assign_empty {
            return Ok(Availability { available: true, assigned_seats: vec![], remaining: 100 });
        }
        let assigned = if seat_ids.is_empty() {
            (1..=quantity).map(|n| format!("S-{n}")).collect()
        } else {
            seat_ids.to_vec()
        };
        Ok(Availability { available: true, assigned_seats: assigned, remaining: 100 })
    }

    async fn reserve_seats(
        &self,
        _ctx: &RequestContext,
        request: &ReserveRequest,
    ) -> InventoryResult<ReserveGrant> {
        self.reserve_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.state.lock().fail_reserve.pop_front() {
            return Err(error);
        }
        Ok(ReserveGrant {
            hold_token: format!("hold-{}", request.reservation_id),
            reserved_seats: request.seat_ids.clone(),
        })
    }

    async fn commit(
        &self,
        _ctx: &RequestContext,
        _request: &CommitRequest,
    ) -> InventoryResult<CommitOutcome> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if let Some(error) = state.fail_commit.pop_front() {
            return Err(error);
        }
        Ok(state.commit_outcome.take().unwrap_or(CommitOutcome::Committed))
    }

    async fn release(
        &self,
        _ctx: &RequestContext,
        _request: &ReleaseRequest,
    ) -> InventoryResult<ReleaseOutcome> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if let Some(error) = state.fail_release.pop_front() {
            return Err(error);
        }
        Ok(state.release_outcome.take().unwrap_or(ReleaseOutcome::Released))
    }
}

/// Event sink that keeps everything it was asked to publish.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EventEnvelope>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EventEnvelope> {
        self.events.lock().clone()
    }

    /// Event types recorded for one aggregate, in publish order.
    pub fn types_for(&self, reservation_id: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.detail["reservation_id"] == reservation_id)
            .map(|e| e.event_type.clone())
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), SinkError> {
        self.events.lock().push(envelope.clone());
        Ok(())
    }
}

/// Store wrapper that fails the next N transactional writes, for
/// crash-between-reserve-and-persist scenarios.
pub struct FlakyStore {
    inner: Arc<dyn StoreGateway>,
    failing_txns: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn StoreGateway>) -> Self {
        Self { inner, failing_txns: AtomicU32::new(0) }
    }

    pub fn fail_next_txns(&self, count: u32) {
        self.failing_txns.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreGateway for FlakyStore {
    async fn get(&self, table: Table, pk: &str, sk: &str) -> StoreResult<Option<StoredRow>> {
        self.inner.get(table, pk, sk).await
    }

    async fn put_if_absent(&self, table: Table, row: StoredRow) -> StoreResult<PutOutcome> {
        self.inner.put_if_absent(table, row).await
    }

    async fn conditional_update(
        &self,
        table: Table,
        row: StoredRow,
        expected_status: &str,
    ) -> StoreResult<UpdateOutcome> {
        self.inner.conditional_update(table, row, expected_status).await
    }

    async fn transactional_write(&self, items: Vec<WriteItem>) -> StoreResult<TxnOutcome> {
        let remaining = self.failing_txns.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_txns.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Transient("injected write failure".into()));
        }
        self.inner.transactional_write(items).await
    }

    async fn scan_by_index(
        &self,
        query: ScanQuery,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<StoredRow>> {
        self.inner.scan_by_index(query, now, limit).await
    }
}

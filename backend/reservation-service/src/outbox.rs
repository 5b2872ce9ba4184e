/// Outbox storage and dispatch over the store gateway
///
/// The state machine writes outbox rows inside its transactional batches;
/// `GatewayOutboxStore` gives the drainer its lease/mark operations on the
/// same table, all through conditional writes. `OutboxDispatcher` is the
/// drainer's publisher: domain events go to the bus, release task rows are
/// executed against the inventory client, both under the drainer's retry
/// schedule.
use crate::context::RequestContext;
use crate::events::EnvelopePublisher;
use crate::inventory::{InventoryApi, ReleaseRequest};
use crate::store::{tables, ScanQuery, StoreError, StoreGateway, Table, UpdateOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use transactional_outbox::{
    Clock, EventPublisher, OutboxEntry, OutboxError, OutboxResult, OutboxStatus, OutboxStore,
};
use uuid::Uuid;

/// Entry type for a retriable inventory release. Task rows with this type
/// never reach the bus; the dispatcher drives them against inventory.
pub const RELEASE_TASK: &str = "INVENTORY_RELEASE_REQUESTED";

pub struct GatewayOutboxStore {
    store: Arc<dyn StoreGateway>,
    clock: Arc<dyn Clock>,
}

impl GatewayOutboxStore {
    pub fn new(store: Arc<dyn StoreGateway>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    async fn load(&self, outbox_id: Uuid) -> OutboxResult<OutboxEntry> {
        let row = self
            .store
            .get(Table::Outbox, &outbox_id.to_string(), tables::OUTBOX_SK)
            .await
            .map_err(to_outbox_error)?
            .ok_or(OutboxError::EntryNotFound(outbox_id))?;
        tables::decode_outbox(&row).map_err(to_outbox_error)
    }

    async fn update(&self, entry: &OutboxEntry, expected: OutboxStatus) -> OutboxResult<bool> {
        let row = tables::outbox_row(entry).map_err(to_outbox_error)?;
        let outcome = self
            .store
            .conditional_update(Table::Outbox, row, expected.as_str())
            .await
            .map_err(to_outbox_error)?;
        Ok(outcome == UpdateOutcome::Applied)
    }
}

fn to_outbox_error(error: StoreError) -> OutboxError {
    OutboxError::Store(error.to_string())
}

#[async_trait]
impl OutboxStore for GatewayOutboxStore {
    async fn fetch_due(&self, now: DateTime<Utc>, limit: usize) -> OutboxResult<Vec<OutboxEntry>> {
        let rows = self
            .store
            .scan_by_index(ScanQuery::DueOutbox, now, limit)
            .await
            .map_err(to_outbox_error)?;
        rows.iter().map(|r| tables::decode_outbox(r).map_err(to_outbox_error)).collect()
    }

    async fn lease(&self, entry: &OutboxEntry) -> OutboxResult<bool> {
        let mut leased = entry.clone();
        leased.status = OutboxStatus::Processing;
        self.update(&leased, entry.status).await
    }

    async fn mark_published(&self, outbox_id: Uuid) -> OutboxResult<()> {
        let mut entry = self.load(outbox_id).await?;
        entry.status = OutboxStatus::Published;
        entry.next_retry_at = None;
        if !self.update(&entry, OutboxStatus::Processing).await? {
            warn!(outbox_id = %outbox_id, "lease was lost before mark_published");
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        outbox_id: Uuid,
        attempts: u32,
        next_retry_at: Option<DateTime<Utc>>,
        error: &str,
    ) -> OutboxResult<()> {
        let mut entry = self.load(outbox_id).await?;
        entry.status = OutboxStatus::Failed;
        entry.attempts = attempts;
        entry.next_retry_at = next_retry_at;
        entry.last_error = Some(error.to_string());
        if !self.update(&entry, OutboxStatus::Processing).await? {
            warn!(outbox_id = %outbox_id, "lease was lost before mark_failed");
        }
        Ok(())
    }

    async fn requeue_failed(&self, limit: usize) -> OutboxResult<u64> {
        let rows = self
            .store
            .scan_by_index(ScanQuery::ParkedOutbox, self.clock.now(), limit)
            .await
            .map_err(to_outbox_error)?;

        let mut requeued = 0u64;
        for row in rows {
            let mut entry = tables::decode_outbox(&row).map_err(to_outbox_error)?;
            entry.status = OutboxStatus::Pending;
            entry.attempts = 0;
            entry.next_retry_at = None;
            entry.last_error = None;
            if self.update(&entry, OutboxStatus::Failed).await? {
                requeued += 1;
            }
        }
        Ok(requeued)
    }
}

/// Routes drained rows by type: release tasks to inventory, everything else
/// to the bus publisher. Failures feed the drainer's retry bookkeeping
/// either way.
pub struct OutboxDispatcher {
    events: Arc<EnvelopePublisher>,
    inventory: Arc<dyn InventoryApi>,
    internal_budget: Duration,
}

impl OutboxDispatcher {
    pub fn new(
        events: Arc<EnvelopePublisher>,
        inventory: Arc<dyn InventoryApi>,
        internal_budget: Duration,
    ) -> Self {
        Self { events, inventory, internal_budget }
    }
}

#[async_trait]
impl EventPublisher for OutboxDispatcher {
    async fn publish(&self, entry: &OutboxEntry) -> OutboxResult<()> {
        if entry.event_type != RELEASE_TASK {
            return self.events.publish(entry).await;
        }

        let request: ReleaseRequest = serde_json::from_value(entry.payload.clone())?;
        let ctx = RequestContext::internal(self.internal_budget)
            .with_trace_id(entry.trace_id.clone());
        match self.inventory.release(&ctx, &request).await {
            // A hold already freed upstream reports not_found; the task is
            // complete either way.
            Ok(_) => {
                info!(
                    reservation_id = %request.reservation_id,
                    trace_id = %entry.trace_id,
                    "queued inventory release completed"
                );
                Ok(())
            }
            Err(e) => Err(OutboxError::PublishFailed(e.to_string())),
        }
    }
}

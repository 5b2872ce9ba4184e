//! Background drainer: leases due outbox rows and publishes them.

use crate::{Clock, EventPublisher, OutboxEntry, OutboxResult, OutboxStore};
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct DrainerConfig {
    /// Rows fetched per scan
    pub batch_size: usize,
    /// Sleep between scans
    pub poll_interval: Duration,
    /// Publish attempts before a row parks in terminal FAILED
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt
    pub backoff_base: Duration,
    /// Upper bound on the retry delay
    pub backoff_cap: Duration,
}

impl Default for DrainerConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            poll_interval: Duration::from_secs(1),
            max_attempts: 5,
            backoff_base: Duration::from_secs(30),
            backoff_cap: Duration::from_secs(480),
        }
    }
}

/// Outcome of a single drain pass, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub scanned: usize,
    pub published: usize,
    pub failed: usize,
    pub lost_lease: usize,
}

pub struct OutboxDrainer<S, P> {
    store: Arc<S>,
    publisher: Arc<P>,
    clock: Arc<dyn Clock>,
    config: DrainerConfig,
}

impl<S: OutboxStore, P: EventPublisher> OutboxDrainer<S, P> {
    pub fn new(
        store: Arc<S>,
        publisher: Arc<P>,
        clock: Arc<dyn Clock>,
        config: DrainerConfig,
    ) -> Self {
        Self { store, publisher, clock, config }
    }

    /// Run forever. Spawn as a background task; storage errors are logged and
    /// the loop keeps going.
    pub async fn run(&self) {
        info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_attempts = self.config.max_attempts,
            "outbox drainer starting"
        );

        loop {
            match self.drain_once().await {
                Ok(report) if report.scanned > 0 => {
                    info!(
                        scanned = report.scanned,
                        published = report.published,
                        failed = report.failed,
                        lost_lease = report.lost_lease,
                        "outbox drain pass complete"
                    );
                }
                Ok(_) => debug!("no due outbox rows"),
                Err(e) => error!(error = %e, "outbox drain pass failed"),
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// One scan-lease-publish pass over due rows, oldest first.
    pub async fn drain_once(&self) -> OutboxResult<DrainReport> {
        let now = self.clock.now();
        let due = self.store.fetch_due(now, self.config.batch_size).await?;
        let mut report = DrainReport { scanned: due.len(), ..DrainReport::default() };

        for entry in due {
            if !self.store.lease(&entry).await? {
                report.lost_lease += 1;
                continue;
            }

            match self.publisher.publish(&entry).await {
                Ok(()) => {
                    self.store.mark_published(entry.outbox_id).await?;
                    report.published += 1;
                }
                Err(e) => {
                    self.handle_publish_failure(&entry, &e.to_string()).await?;
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn handle_publish_failure(&self, entry: &OutboxEntry, cause: &str) -> OutboxResult<()> {
        let attempts = entry.attempts + 1;

        if attempts >= self.config.max_attempts {
            error!(
                outbox_id = %entry.outbox_id,
                event_type = %entry.event_type,
                aggregate_id = %entry.aggregate_id,
                attempts,
                error = %cause,
                "outbox entry exhausted its retry budget, parking as FAILED"
            );
            self.store.mark_failed(entry.outbox_id, attempts, None, cause).await
        } else {
            let delay = self.backoff(attempts);
            let next_retry_at =
                self.clock.now() + ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::zero());
            warn!(
                outbox_id = %entry.outbox_id,
                event_type = %entry.event_type,
                attempts,
                retry_in_secs = delay.as_secs(),
                error = %cause,
                "outbox publish failed, scheduling retry"
            );
            self.store
                .mark_failed(entry.outbox_id, attempts, Some(next_retry_at), cause)
                .await
        }
    }

    /// Delay before retry number `attempts + 1`: base doubled per prior
    /// attempt, capped.
    fn backoff(&self, attempts: u32) -> Duration {
        let base = self.config.backoff_base.as_secs().max(1);
        let exp = attempts.saturating_sub(1).min(16);
        let secs = base.saturating_mul(1u64 << exp);
        Duration::from_secs(secs.min(self.config.backoff_cap.as_secs()))
    }
}

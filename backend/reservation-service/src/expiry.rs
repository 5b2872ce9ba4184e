/// Hold-expiry scheduling
///
/// Two cooperating realizations drive the same expire transition:
/// - `TimerScheduler`: in-process timers registered at create time, firing at
///   the hold deadline
/// - `ExpirySweeper`: a periodic backstop scan that catches holds whose timer
///   was lost to a crash or a missed registration
///
/// The HOLD → EXPIRED conditional write makes duplicate fires harmless, so
/// both can run at once.
use crate::reservation::ReservationCore;
use crate::store::{tables, ScanQuery, StoreGateway};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use transactional_outbox::Clock;
use uuid::Uuid;

/// Where the state machine submits expiry registrations.
pub trait ExpiryRegistrar: Send + Sync {
    fn register(&self, reservation_id: Uuid, fire_at: DateTime<Utc>);
}

/// Sweeper-only deployments register nothing.
pub struct NoopRegistrar;

impl ExpiryRegistrar for NoopRegistrar {
    fn register(&self, _reservation_id: Uuid, _fire_at: DateTime<Utc>) {}
}

/// In-process timer registry. Registrations are queued to a dispatcher task
/// so the create path never blocks on scheduling.
#[derive(Clone)]
pub struct TimerScheduler {
    tx: mpsc::UnboundedSender<(Uuid, DateTime<Utc>)>,
}

impl TimerScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(Uuid, DateTime<Utc>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Dispatcher loop: one sleeping task per registered hold.
    pub async fn run(
        mut rx: mpsc::UnboundedReceiver<(Uuid, DateTime<Utc>)>,
        core: Arc<ReservationCore>,
        clock: Arc<dyn Clock>,
    ) {
        info!("expiry timer scheduler started");
        while let Some((reservation_id, fire_at)) = rx.recv().await {
            let core = core.clone();
            let wait = (fire_at - clock.now()).to_std().unwrap_or(Duration::ZERO);
            debug!(reservation_id = %reservation_id, wait_ms = wait.as_millis() as u64, "expiry timer registered");
            tokio::spawn(async move {
                tokio::time::sleep(wait).await;
                if let Err(e) = core.expire(reservation_id).await {
                    warn!(reservation_id = %reservation_id, error = %e, "timer-driven expire failed; sweeper will retry");
                }
            });
        }
    }
}

impl ExpiryRegistrar for TimerScheduler {
    fn register(&self, reservation_id: Uuid, fire_at: DateTime<Utc>) {
        if self.tx.send((reservation_id, fire_at)).is_err() {
            warn!(reservation_id = %reservation_id, "expiry scheduler is gone; sweeper will pick this hold up");
        }
    }
}

/// Periodic backstop: scans due holds and drives them through expire.
pub struct ExpirySweeper {
    store: Arc<dyn StoreGateway>,
    core: Arc<ReservationCore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    batch_size: usize,
}

impl ExpirySweeper {
    pub fn new(
        store: Arc<dyn StoreGateway>,
        core: Arc<ReservationCore>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        batch_size: usize,
    ) -> Self {
        Self { store, core, clock, interval, batch_size }
    }

    pub async fn run(&self) {
        info!(
            interval_secs = self.interval.as_secs(),
            batch_size = self.batch_size,
            "expiry sweeper started"
        );
        loop {
            match self.sweep_once().await {
                Ok(0) => debug!("no due holds"),
                Ok(expired) => info!(expired, "sweeper expired due holds"),
                Err(e) => error!(error = %e, "expiry sweep failed"),
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    /// One scan over due holds. Returns how many were driven through expire.
    pub async fn sweep_once(&self) -> crate::error::CoreResult<usize> {
        let rows = self
            .store
            .scan_by_index(ScanQuery::ExpiredHolds, self.clock.now(), self.batch_size)
            .await?;

        let mut expired = 0;
        for row in rows {
            let reservation = tables::decode_reservation(&row)?;
            match self.core.expire(reservation.reservation_id).await {
                Ok(()) => expired += 1,
                Err(e) => warn!(
                    reservation_id = %reservation.reservation_id,
                    error = %e,
                    "sweep expire failed; will retry next pass"
                ),
            }
        }
        Ok(expired)
    }
}

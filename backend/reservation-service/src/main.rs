use anyhow::Context;
use reservation_service::config::Config;
use reservation_service::events::{EnvelopePublisher, EventSink, HttpBusSink};
use reservation_service::expiry::{ExpirySweeper, TimerScheduler};
use reservation_service::inventory::{HttpInventoryClient, InventoryApi, ResilientInventory};
use reservation_service::outbox::{GatewayOutboxStore, OutboxDispatcher};
use reservation_service::reservation::{CoreSettings, ReservationCore};
use reservation_service::store::{PgStore, StoreGateway};
use reservation_service::{Clock, SystemClock};
use resilience::{CircuitBreaker, CircuitBreakerConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transactional_outbox::{DrainerConfig, OutboxDrainer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting reservation service workers");

    let config = Config::from_env();

    let pg = PgStore::connect(&config.database.url, config.database.max_connections)
        .await
        .context("database connection failed")?;
    pg.ensure_schema().await.context("schema setup failed")?;
    tracing::info!("Successfully connected to database");

    let store: Arc<dyn StoreGateway> = Arc::new(pg);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let breaker = CircuitBreaker::new(CircuitBreakerConfig {
        error_rate_threshold: config.inventory.circuit_breaker.error_rate_threshold,
        window_size: config.inventory.circuit_breaker.window_size,
        min_calls: config.inventory.circuit_breaker.min_calls,
        open_duration: Duration::from_secs(config.inventory.circuit_breaker.open_duration_seconds),
        half_open_probes: config.inventory.circuit_breaker.half_open_probes,
    });
    let inventory_client = HttpInventoryClient::new(
        config.inventory.base_url.clone(),
        Duration::from_millis(config.inventory.deadline_ms),
    );
    let inventory: Arc<dyn InventoryApi> =
        Arc::new(ResilientInventory::new(Arc::new(inventory_client), breaker));

    let (scheduler, registrations) = TimerScheduler::new();
    let core = Arc::new(ReservationCore::new(
        store.clone(),
        inventory.clone(),
        clock.clone(),
        Arc::new(scheduler),
        CoreSettings {
            hold_duration: Duration::from_secs(config.hold.duration_seconds),
            internal_budget: Duration::from_millis(config.request.deadline_ms),
        },
    ));

    // Expiry: in-process timers plus the backstop sweeper.
    tokio::spawn(TimerScheduler::run(registrations, core.clone(), clock.clone()));
    let sweeper = ExpirySweeper::new(
        store.clone(),
        core.clone(),
        clock.clone(),
        Duration::from_secs(config.sweeper.interval_seconds),
        config.sweeper.batch_size,
    );
    tokio::spawn(async move { sweeper.run().await });

    // Outbox drainer.
    let sink: Arc<dyn EventSink> = Arc::new(HttpBusSink::new(config.event_bus.endpoint.clone()));
    let publisher = Arc::new(EnvelopePublisher::new(sink, config.event_bus.source.clone()));
    let dispatcher = Arc::new(OutboxDispatcher::new(
        publisher,
        inventory,
        Duration::from_millis(config.request.deadline_ms),
    ));
    let outbox_store = Arc::new(GatewayOutboxStore::new(store.clone(), clock.clone()));
    let drainer = OutboxDrainer::new(
        outbox_store,
        dispatcher,
        clock.clone(),
        DrainerConfig {
            batch_size: config.outbox.batch_size,
            poll_interval: Duration::from_secs(config.outbox.poll_interval_seconds),
            max_attempts: config.outbox.max_attempts,
            backoff_base: Duration::from_secs(config.outbox.backoff_base_seconds),
            backoff_cap: Duration::from_secs(config.outbox.backoff_cap_seconds),
        },
    );
    tokio::spawn(async move { drainer.run().await });

    tracing::info!(env = %config.app.env, "reservation core workers running");

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    Ok(())
}

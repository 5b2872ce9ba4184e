/// Configuration management for the reservation service
///
/// Loaded from environment variables with production defaults, one nested
/// struct per concern.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub inventory: InventoryConfig,
    pub event_bus: EventBusConfig,
    pub hold: HoldConfig,
    pub idempotency: IdempotencyConfig,
    pub request: RequestConfig,
    pub outbox: OutboxConfig,
    pub sweeper: SweeperConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application environment (dev, staging, prod)
    pub env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryConfig {
    /// Base URL of the inventory service
    pub base_url: String,
    /// Per-inventory-call budget
    pub deadline_ms: u64,
    pub circuit_breaker: CircuitBreakerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    pub error_rate_threshold: f64,
    pub window_size: usize,
    pub min_calls: usize,
    pub open_duration_seconds: u64,
    pub half_open_probes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Endpoint the event envelopes are POSTed to
    pub endpoint: String,
    /// Stable service identifier stamped on every envelope
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldConfig {
    pub duration_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    /// End-to-end budget for an inbound request
    pub deadline_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    pub batch_size: usize,
    pub max_attempts: u32,
    pub backoff_base_seconds: u64,
    pub backoff_cap_seconds: u64,
    pub poll_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Backstop cadence; keep at or below a quarter of the hold duration
    pub interval_seconds: u64,
    pub batch_size: usize,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            app: AppConfig { env: env_or("APP_ENV", "development") },
            database: DatabaseConfig {
                url: env_or("DATABASE_URL", "postgresql://localhost/ticketline"),
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 20),
            },
            inventory: InventoryConfig {
                base_url: env_or("INVENTORY_BASE_URL", "http://localhost:8090"),
                deadline_ms: env_parse("INVENTORY_DEADLINE_MS", 250),
                circuit_breaker: CircuitBreakerSettings {
                    error_rate_threshold: env_parse("INVENTORY_CB_ERROR_RATE", 0.3),
                    window_size: env_parse("INVENTORY_CB_WINDOW", 50),
                    min_calls: env_parse("INVENTORY_CB_MIN_CALLS", 10),
                    open_duration_seconds: env_parse("INVENTORY_CB_OPEN_SECONDS", 30),
                    half_open_probes: env_parse("INVENTORY_CB_PROBES", 3),
                },
            },
            event_bus: EventBusConfig {
                endpoint: env_or("EVENT_BUS_ENDPOINT", "http://localhost:8091/events"),
                source: env_or("EVENT_SOURCE", "ticketline.reservation-service"),
            },
            hold: HoldConfig { duration_seconds: env_parse("HOLD_DURATION_SECONDS", 60) },
            idempotency: IdempotencyConfig {
                ttl_seconds: env_parse("IDEMPOTENCY_TTL_SECONDS", 300),
            },
            request: RequestConfig { deadline_ms: env_parse("REQUEST_DEADLINE_MS", 600) },
            outbox: OutboxConfig {
                batch_size: env_parse("OUTBOX_BATCH_SIZE", 25),
                max_attempts: env_parse("OUTBOX_MAX_ATTEMPTS", 5),
                backoff_base_seconds: env_parse("OUTBOX_BACKOFF_BASE_SECONDS", 30),
                backoff_cap_seconds: env_parse("OUTBOX_BACKOFF_CAP_SECONDS", 480),
                poll_interval_seconds: env_parse("OUTBOX_POLL_INTERVAL_SECONDS", 1),
            },
            sweeper: SweeperConfig {
                interval_seconds: env_parse("EXPIRY_SWEEPER_INTERVAL_SECONDS", 15),
                batch_size: env_parse("EXPIRY_SWEEPER_BATCH_SIZE", 100),
            },
        }
    }
}

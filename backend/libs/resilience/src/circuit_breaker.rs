/// Circuit breaker with sliding-window error-rate tracking
///
/// State transitions:
/// - Closed → Open: when the failure rate over the sliding window crosses the
///   configured threshold (once enough calls have been observed)
/// - Open → HalfOpen: after the open duration elapses
/// - HalfOpen → Closed: when the probe budget completes without a failure
/// - HalfOpen → Open: on any probe failure
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls pass through
    Closed,
    /// Calls fail fast without reaching the dependency
    Open,
    /// A bounded number of probe calls is admitted
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure rate (0.0 - 1.0) over the window that trips the breaker
    pub error_rate_threshold: f64,
    /// Sliding window size, in call outcomes
    pub window_size: usize,
    /// Minimum observed calls before the rate can trip the breaker
    pub min_calls: usize,
    /// How long the breaker stays open before admitting probes
    pub open_duration: Duration,
    /// Probe calls admitted in HalfOpen; all must succeed to close
    pub half_open_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_rate_threshold: 0.3,
            window_size: 50,
            min_calls: 10,
            open_duration: Duration::from_secs(30),
            half_open_probes: 3,
        }
    }
}

/// Error returned by a protected call. `Rejected` means the call never reached
/// the dependency; `Inner` carries the dependency's own error untouched so
/// callers can still classify it.
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    #[error("circuit breaker is open - failing fast")]
    Rejected,
    #[error("call failed: {0}")]
    Inner(E),
}

#[derive(Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Arc<RwLock<BreakerState>>,
}

struct BreakerState {
    current: CircuitState,
    opened_at: Option<Instant>,
    probes_in_flight: u32,
    probe_successes: u32,
    /// Sliding window: true = success, false = failure
    window: VecDeque<bool>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(BreakerState {
                current: CircuitState::Closed,
                opened_at: None,
                probes_in_flight: 0,
                probe_successes: 0,
                window: VecDeque::with_capacity(config.window_size),
            })),
            config,
        }
    }

    /// Execute a future under breaker protection.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire() {
            return Err(CircuitError::Rejected);
        }

        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitError::Inner(e))
            }
        }
    }

    /// Admission check. In HalfOpen only the probe budget is admitted.
    fn try_acquire(&self) -> bool {
        let mut state = self.state.write();

        match state.current {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = state
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.open_duration)
                    .unwrap_or(true);
                if elapsed {
                    info!("circuit breaker: Open -> HalfOpen");
                    state.current = CircuitState::HalfOpen;
                    state.probes_in_flight = 1;
                    state.probe_successes = 0;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if state.probes_in_flight < self.config.half_open_probes {
                    state.probes_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut state = self.state.write();
        let window_size = self.config.window_size;
        push_outcome(&mut state.window, window_size, true);

        if state.current == CircuitState::HalfOpen {
            state.probe_successes += 1;
            if state.probe_successes >= self.config.half_open_probes {
                info!("circuit breaker: HalfOpen -> Closed");
                state.current = CircuitState::Closed;
                state.opened_at = None;
                state.probes_in_flight = 0;
                state.probe_successes = 0;
                state.window.clear();
            }
        }
    }

    fn record_failure(&self) {
        let mut state = self.state.write();
        let window_size = self.config.window_size;
        push_outcome(&mut state.window, window_size, false);

        match state.current {
            CircuitState::Closed => {
                let rate = failure_rate(&state.window);
                if state.window.len() >= self.config.min_calls
                    && rate >= self.config.error_rate_threshold
                {
                    warn!(
                        failure_rate = rate,
                        observed_calls = state.window.len(),
                        "circuit breaker: Closed -> Open"
                    );
                    state.current = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!("circuit breaker: HalfOpen -> Open (probe failed)");
                state.current = CircuitState::Open;
                state.opened_at = Some(Instant::now());
                state.probes_in_flight = 0;
                state.probe_successes = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Current state, for monitoring.
    pub fn state(&self) -> CircuitState {
        self.state.read().current
    }

    /// Current windowed failure rate, for monitoring.
    pub fn failure_rate(&self) -> f64 {
        failure_rate(&self.state.read().window)
    }
}

fn push_outcome(window: &mut VecDeque<bool>, capacity: usize, success: bool) {
    if window.len() >= capacity {
        window.pop_front();
    }
    window.push_back(success);
}

fn failure_rate(window: &VecDeque<bool>) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    let failures = window.iter().filter(|&&ok| !ok).count();
    failures as f64 / window.len() as f64
}

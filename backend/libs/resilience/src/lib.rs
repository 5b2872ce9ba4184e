/// Resilience primitives for the reservation platform
///
/// This library provides the building blocks every outbound dependency is
/// wrapped in:
/// - **Circuit Breaker**: fails fast when a dependency's error rate crosses a
///   threshold over a sliding window of calls
/// - **Retry**: exponential backoff with jitter and a retriability predicate
/// - **Deadline**: absolute per-request budgets propagated to per-call timeouts
///
/// # Example: protected dependency call
///
/// ```rust,no_run
/// use resilience::{CircuitBreaker, CircuitBreakerConfig, Deadline};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
///     let deadline = Deadline::after(Duration::from_millis(600));
///
///     let result = breaker.call(|| async {
///         let timeout = deadline.clamp(Duration::from_millis(250));
///         // outbound call bounded by `timeout` here
///         let _ = timeout;
///         Ok::<_, String>(())
///     }).await;
///     let _ = result;
/// }
/// ```
pub mod circuit_breaker;
pub mod deadline;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitError, CircuitState};
pub use deadline::{with_timeout, Deadline, TimeoutError};
pub use retry::{with_retry, RetryError, RetryPolicy};

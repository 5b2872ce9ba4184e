/// Absolute request deadlines and budget-aware per-call timeouts
///
/// Every externally-originated request carries a `Deadline`. Downstream calls
/// derive their own timeout from the remaining budget, so a per-call timeout
/// can never exceed what is left of the end-to-end budget.
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self { at: Instant::now() + budget }
    }

    /// Remaining budget; zero once the deadline has passed.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Bound a per-call timeout by the remaining request budget.
    pub fn clamp(&self, per_call: Duration) -> Duration {
        per_call.min(self.remaining())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TimeoutError<E> {
    #[error("operation timed out after {0:?}")]
    Elapsed(Duration),
    #[error("operation failed: {0}")]
    Inner(E),
}

/// Run a fallible future bounded by `min(per_call, deadline.remaining())`.
pub async fn with_timeout<F, T, E>(
    deadline: Deadline,
    per_call: Duration,
    future: F,
) -> Result<T, TimeoutError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    let limit = deadline.clamp(per_call);
    match tokio::time::timeout(limit, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TimeoutError::Inner(e)),
        Err(_) => Err(TimeoutError::Elapsed(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clamp_never_exceeds_remaining_budget() {
        let deadline = Deadline::after(Duration::from_millis(100));
        let clamped = deadline.clamp(Duration::from_secs(5));
        assert!(clamped <= Duration::from_millis(100));

        let generous = Deadline::after(Duration::from_secs(10));
        assert_eq!(generous.clamp(Duration::from_millis(250)), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn expired_deadline_reports_zero_budget() {
        let deadline = Deadline::after(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(deadline.expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn with_timeout_returns_inner_result() {
        let deadline = Deadline::after(Duration::from_secs(1));
        let ok = with_timeout(deadline, Duration::from_millis(100), async { Ok::<_, &str>(5) }).await;
        assert_eq!(ok.unwrap(), 5);

        let err: Result<i32, _> =
            with_timeout(deadline, Duration::from_millis(100), async { Err("nope") }).await;
        assert!(matches!(err, Err(TimeoutError::Inner("nope"))));
    }

    #[tokio::test]
    async fn with_timeout_elapses_on_slow_call() {
        let deadline = Deadline::after(Duration::from_millis(40));
        let result: Result<(), _> = with_timeout(deadline, Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, &str>(())
        })
        .await;
        assert!(matches!(result, Err(TimeoutError::Elapsed(_))));
    }
}

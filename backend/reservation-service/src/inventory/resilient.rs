/// Circuit-breaker and retry policy around an inventory client
///
/// One breaker guards the dependency as a whole. Per-operation policy:
/// - `check_availability`: retried on transient failures while budget remains
/// - `reserve_seats`, `commit`: single-shot
/// - `release`: up to two retries with jittered backoff
///
/// An open circuit surfaces as `Unavailable`, which the state machine maps to
/// its fallback policy per operation.
use crate::context::RequestContext;
use crate::inventory::{
    Availability, CommitOutcome, CommitRequest, InventoryApi, InventoryError, InventoryResult,
    ReleaseOutcome, ReleaseRequest, ReserveGrant, ReserveRequest,
};
use async_trait::async_trait;
use resilience::{with_retry, CircuitBreaker, CircuitError, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

pub struct ResilientInventory {
    inner: Arc<dyn InventoryApi>,
    breaker: CircuitBreaker,
    check_retry: RetryPolicy,
    release_retry: RetryPolicy,
}

fn is_transient(error: &CircuitError<InventoryError>) -> bool {
    match error {
        // An open breaker will stay open for the whole attempt budget.
        CircuitError::Rejected => false,
        CircuitError::Inner(inner) => matches!(
            inner,
            InventoryError::Timeout(_)
                | InventoryError::Transport(_)
                | InventoryError::Unavailable(_)
        ),
    }
}

fn unwrap_circuit(error: CircuitError<InventoryError>) -> InventoryError {
    match error {
        CircuitError::Rejected => {
            InventoryError::Unavailable("inventory circuit breaker is open".to_string())
        }
        CircuitError::Inner(inner) => inner,
    }
}

impl ResilientInventory {
    pub fn new(inner: Arc<dyn InventoryApi>, breaker: CircuitBreaker) -> Self {
        Self {
            inner,
            breaker,
            check_retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(25),
                max_backoff: Duration::from_millis(100),
                backoff_multiplier: 2.0,
                jitter: true,
            },
            release_retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(50),
                max_backoff: Duration::from_millis(400),
                backoff_multiplier: 2.0,
                jitter: true,
            },
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl InventoryApi for ResilientInventory {
    async fn check_availability(
        &self,
        ctx: &RequestContext,
        event_id: &str,
        quantity: u32,
        seat_ids: &[String],
    ) -> InventoryResult<Availability> {
        with_retry(&self.check_retry, is_transient, || {
            self.breaker
                .call(|| self.inner.check_availability(ctx, event_id, quantity, seat_ids))
        })
        .await
        .map_err(|e| unwrap_circuit(e.into_inner()))
    }

    async fn reserve_seats(
        &self,
        ctx: &RequestContext,
        request: &ReserveRequest,
    ) -> InventoryResult<ReserveGrant> {
        self.breaker
            .call(|| self.inner.reserve_seats(ctx, request))
            .await
            .map_err(unwrap_circuit)
    }

    async fn commit(
        &self,
        ctx: &RequestContext,
        request: &CommitRequest,
    ) -> InventoryResult<CommitOutcome> {
        self.breaker.call(|| self.inner.commit(ctx, request)).await.map_err(unwrap_circuit)
    }

    async fn release(
        &self,
        ctx: &RequestContext,
        request: &ReleaseRequest,
    ) -> InventoryResult<ReleaseOutcome> {
        with_retry(&self.release_retry, is_transient, || {
            self.breaker.call(|| self.inner.release(ctx, request))
        })
        .await
        .map_err(|e| unwrap_circuit(e.into_inner()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::FakeInventory;
    use resilience::CircuitBreakerConfig;
    use uuid::Uuid;

    fn ctx() -> RequestContext {
        RequestContext::new("user-1", Duration::from_millis(600))
    }

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            error_rate_threshold: 0.3,
            window_size: 10,
            min_calls: 2,
            open_duration: Duration::from_secs(30),
            half_open_probes: 1,
        })
    }

    #[tokio::test]
    async fn reserve_is_single_shot() {
        let fake = Arc::new(FakeInventory::new());
        fake.fail_next_reserve(InventoryError::Transport("reset".into()));
        let resilient = ResilientInventory::new(fake.clone(), breaker());

        let request = ReserveRequest {
            event_id: "evt".into(),
            seat_ids: vec!["A-1".into()],
            quantity: 1,
            reservation_id: Uuid::new_v4(),
            user_id: "user-1".into(),
            hold_seconds: 60,
        };
        let result = resilient.reserve_seats(&ctx(), &request).await;
        assert!(result.is_err());
        assert_eq!(fake.reserve_calls(), 1);
    }

    #[tokio::test]
    async fn release_retries_transient_failures() {
        let fake = Arc::new(FakeInventory::new());
        fake.fail_next_release(InventoryError::Transport("reset".into()));
        let resilient = ResilientInventory::new(fake.clone(), breaker());

        let request = ReleaseRequest {
            reservation_id: Uuid::new_v4(),
            event_id: "evt".into(),
            seat_ids: vec!["A-1".into()],
            hold_token: "hold-1".into(),
        };
        let outcome = resilient.release(&ctx(), &request).await.unwrap();
        assert_eq!(outcome, ReleaseOutcome::Released);
        assert_eq!(fake.release_calls(), 2);
    }

    #[tokio::test]
    async fn open_circuit_fails_fast_as_unavailable() {
        let fake = Arc::new(FakeInventory::new());
        let resilient = ResilientInventory::new(fake.clone(), breaker());

        fake.fail_next_commit(InventoryError::Transport("reset".into()));
        fake.fail_next_commit(InventoryError::Transport("reset".into()));
        let request = CommitRequest {
            reservation_id: Uuid::new_v4(),
            event_id: "evt".into(),
            seat_ids: vec![],
            hold_token: "hold-1".into(),
            payment_intent_id: "pay-1".into(),
        };
        for _ in 0..2 {
            let _ = resilient.commit(&ctx(), &request).await;
        }

        let calls_before = fake.commit_calls();
        let result = resilient.commit(&ctx(), &request).await;
        assert!(matches!(result, Err(InventoryError::Unavailable(_))));
        assert_eq!(fake.commit_calls(), calls_before);
    }
}

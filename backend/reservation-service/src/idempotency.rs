/// Request deduplication by idempotency key and body fingerprint
///
/// `execute` wraps every mutating operation: a repeat of a completed request
/// replays the stored snapshot instead of re-running the action, and a reused
/// key with a different body is a conflict. Both success responses and
/// business errors are snapshotted; transient infrastructure errors are not,
/// so the caller's retry gets a fresh attempt.
///
/// Writers race through `put_if_absent`: the loser discards its own outcome
/// and replays the winner's snapshot, which keeps side effects at-most-once
/// from the caller's point of view.
use crate::context::RequestContext;
use crate::error::{CoreError, CoreResult, ErrorBody};
use crate::models::IdempotencyRecord;
use crate::store::{tables, PutOutcome, StoreGateway, Table};
use chrono::Duration as ChronoDuration;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use transactional_outbox::Clock;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
enum SnapshotOutcome<T> {
    Ok(T),
    Err(ErrorBody),
}

pub struct IdempotencyManager {
    store: Arc<dyn StoreGateway>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl IdempotencyManager {
    pub fn new(store: Arc<dyn StoreGateway>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    /// sha-256 over the canonical serialized request body.
    pub fn fingerprint<R: Serialize>(request: &R) -> CoreResult<String> {
        let canonical = serde_json::to_vec(request)
            .map_err(|e| CoreError::Internal(format!("request not serializable: {e}")))?;
        Ok(hex::encode(Sha256::digest(&canonical)))
    }

    pub async fn execute<R, T, F, Fut>(
        &self,
        ctx: &RequestContext,
        key: Option<&str>,
        request: &R,
        action: F,
    ) -> CoreResult<T>
    where
        R: Serialize,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let key = match key {
            Some(k) if !k.is_empty() => k,
            _ => return Err(CoreError::IdempotencyRequired),
        };
        let fingerprint = Self::fingerprint(request)?;

        if let Some(record) = self.load(key).await? {
            return self.replay(ctx, key, &record, &fingerprint);
        }

        let outcome = match action().await {
            Ok(response) => SnapshotOutcome::Ok(response),
            Err(e) if e.is_cacheable() => SnapshotOutcome::Err(e.body(&ctx.trace_id)),
            Err(e) => return Err(e),
        };

        let now = self.clock.now();
        let record = IdempotencyRecord {
            idempotency_key: key.to_string(),
            request_fingerprint: fingerprint.clone(),
            response_snapshot: serde_json::to_value(&outcome)
                .map_err(|e| CoreError::Internal(format!("snapshot not serializable: {e}")))?,
            expires_at: now
                + ChronoDuration::from_std(self.ttl).unwrap_or(ChronoDuration::seconds(300)),
            created_at: now,
        };

        let row = tables::idempotency_row(&record)?;
        match self.store.put_if_absent(Table::Idempotency, row).await? {
            PutOutcome::Inserted => into_result(outcome),
            PutOutcome::Conflict => {
                // A concurrent first-writer won; replay theirs.
                warn!(idempotency_key = %key, trace_id = %ctx.trace_id, "lost idempotency write race");
                match self.load(key).await? {
                    Some(winner) => self.replay(ctx, key, &winner, &fingerprint),
                    None => into_result(outcome),
                }
            }
        }
    }

    async fn load(&self, key: &str) -> CoreResult<Option<IdempotencyRecord>> {
        let row = self.store.get(Table::Idempotency, key, tables::IDEMPOTENCY_SK).await?;
        row.map(|r| tables::decode_idempotency(&r).map_err(CoreError::from)).transpose()
    }

    fn replay<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        key: &str,
        record: &IdempotencyRecord,
        fingerprint: &str,
    ) -> CoreResult<T> {
        if record.request_fingerprint != fingerprint {
            return Err(CoreError::IdempotencyConflict);
        }

        debug!(idempotency_key = %key, trace_id = %ctx.trace_id, "replaying cached response");
        let outcome: SnapshotOutcome<T> =
            serde_json::from_value(record.response_snapshot.clone())
                .map_err(|e| CoreError::Internal(format!("snapshot not decodable: {e}")))?;
        into_result(outcome)
    }
}

fn into_result<T>(outcome: SnapshotOutcome<T>) -> CoreResult<T> {
    match outcome {
        SnapshotOutcome::Ok(value) => Ok(value),
        SnapshotOutcome::Err(body) => Err(CoreError::from_body(&body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicU32, Ordering};
    use transactional_outbox::ManualClock;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct SampleRequest {
        event_id: String,
        quantity: u32,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct SampleResponse {
        id: u32,
    }

    fn harness() -> (Arc<ManualClock>, IdempotencyManager) {
        let clock = Arc::new(ManualClock::new(
            "2026-01-10T12:00:00Z".parse::<DateTime<Utc>>().unwrap(),
        ));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let manager = IdempotencyManager::new(store, clock.clone(), Duration::from_secs(300));
        (clock, manager)
    }

    fn ctx() -> RequestContext {
        RequestContext::new("user-1", Duration::from_millis(600))
    }

    fn request() -> SampleRequest {
        SampleRequest { event_id: "evt-1".into(), quantity: 2 }
    }

    #[tokio::test]
    async fn missing_key_is_rejected_before_the_action_runs() {
        let (_clock, manager) = harness();
        let calls = AtomicU32::new(0);

        let result: CoreResult<SampleResponse> = manager
            .execute(&ctx(), None, &request(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(SampleResponse { id: 1 }) }
            })
            .await;

        assert!(matches!(result, Err(CoreError::IdempotencyRequired)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repeat_replays_without_rerunning_the_action() {
        let (_clock, manager) = harness();
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let result: CoreResult<SampleResponse> = manager
                .execute(&ctx(), Some("K1"), &request(), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(SampleResponse { id: 7 }) }
                })
                .await;
            assert_eq!(result.unwrap(), SampleResponse { id: 7 });
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_body_on_same_key_conflicts() {
        let (_clock, manager) = harness();

        let _: SampleResponse = manager
            .execute(&ctx(), Some("K1"), &request(), || async { Ok(SampleResponse { id: 7 }) })
            .await
            .unwrap();

        let other = SampleRequest { event_id: "evt-2".into(), quantity: 2 };
        let result: CoreResult<SampleResponse> = manager
            .execute(&ctx(), Some("K1"), &other, || async { Ok(SampleResponse { id: 8 }) })
            .await;

        assert!(matches!(result, Err(CoreError::IdempotencyConflict)));
    }

    #[tokio::test]
    async fn business_errors_replay_identically() {
        let (_clock, manager) = harness();
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let result: CoreResult<SampleResponse> = manager
                .execute(&ctx(), Some("K1"), &request(), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(CoreError::SeatUnavailable) }
                })
                .await;
            assert!(matches!(result, Err(CoreError::SeatUnavailable)));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_errors_are_not_cached() {
        let (_clock, manager) = harness();
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let result: CoreResult<SampleResponse> = manager
                .execute(&ctx(), Some("K1"), &request(), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(CoreError::UpstreamTimeout) }
                })
                .await;
            assert!(matches!(result, Err(CoreError::UpstreamTimeout)));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn out_of_window_repeat_is_a_fresh_request() {
        let (clock, manager) = harness();
        let calls = AtomicU32::new(0);

        let run = |id: u32| {
            let calls = &calls;
            let manager = &manager;
            async move {
                let result: CoreResult<SampleResponse> = manager
                    .execute(&ctx(), Some("K1"), &request(), || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async move { Ok(SampleResponse { id }) }
                    })
                    .await;
                result.unwrap()
            }
        };

        assert_eq!(run(1).await, SampleResponse { id: 1 });
        clock.advance(ChronoDuration::seconds(301));
        assert_eq!(run(2).await, SampleResponse { id: 2 });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn fingerprints_are_stable_and_body_sensitive() {
        let a = IdempotencyManager::fingerprint(&request()).unwrap();
        let b = IdempotencyManager::fingerprint(&request()).unwrap();
        let c = IdempotencyManager::fingerprint(&SampleRequest {
            event_id: "evt-1".into(),
            quantity: 3,
        })
        .unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}

/// HTTP adapter for the inventory service
///
/// Wire shape is a plain JSON RPC surface; each call is bounded by
/// `min(per-call deadline, remaining request budget)`.
use crate::context::RequestContext;
use crate::inventory::{
    Availability, CommitOutcome, CommitRequest, InventoryApi, InventoryError, InventoryResult,
    ReleaseOutcome, ReleaseRequest, ReserveGrant, ReserveRequest,
};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub struct HttpInventoryClient {
    client: reqwest::Client,
    base_url: String,
    call_deadline: Duration,
}

#[derive(Debug, Serialize)]
struct AvailabilityBody<'a> {
    event_id: &'a str,
    quantity: u32,
    seat_ids: &'a [String],
}

#[derive(Debug, Deserialize)]
struct CommitBody {
    result: CommitOutcome,
}

#[derive(Debug, Deserialize)]
struct ReleaseBody {
    result: ReleaseOutcome,
}

impl HttpInventoryClient {
    pub fn new(base_url: impl Into<String>, call_deadline: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            call_deadline,
        }
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        path: &str,
        body: &B,
    ) -> InventoryResult<R> {
        let timeout = ctx.deadline.clamp(self.call_deadline);
        if timeout.is_zero() {
            return Err(InventoryError::Timeout(timeout));
        }

        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, timeout_ms = timeout.as_millis() as u64, trace_id = %ctx.trace_id, "inventory call");

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .header("x-trace-id", &ctx.trace_id)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InventoryError::Timeout(timeout)
                } else if e.is_connect() {
                    InventoryError::Unavailable(e.to_string())
                } else {
                    InventoryError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            response
                .json::<R>()
                .await
                .map_err(|e| InventoryError::Transport(e.to_string()))
        } else if status.is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            Err(InventoryError::Rejected(format!("{status}: {detail}")))
        } else {
            Err(InventoryError::Unavailable(format!("inventory returned {status}")))
        }
    }
}

#[async_trait]
impl InventoryApi for HttpInventoryClient {
    async fn check_availability(
        &self,
        ctx: &RequestContext,
        event_id: &str,
        quantity: u32,
        seat_ids: &[String],
    ) -> InventoryResult<Availability> {
        self.post(ctx, "/v1/availability/check", &AvailabilityBody { event_id, quantity, seat_ids })
            .await
    }

    async fn reserve_seats(
        &self,
        ctx: &RequestContext,
        request: &ReserveRequest,
    ) -> InventoryResult<ReserveGrant> {
        self.post(ctx, "/v1/holds", request).await
    }

    async fn commit(
        &self,
        ctx: &RequestContext,
        request: &CommitRequest,
    ) -> InventoryResult<CommitOutcome> {
        let body: CommitBody = self.post(ctx, "/v1/holds/commit", request).await?;
        Ok(body.result)
    }

    async fn release(
        &self,
        ctx: &RequestContext,
        request: &ReleaseRequest,
    ) -> InventoryResult<ReleaseOutcome> {
        let body: ReleaseBody = self.post(ctx, "/v1/holds/release", request).await?;
        Ok(body.result)
    }
}

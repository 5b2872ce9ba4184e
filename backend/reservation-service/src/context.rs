/// Per-request context: correlation id, caller identity, absolute deadline
///
/// Built once at the transport edge and threaded through every component, so
/// downstream calls can derive bounded timeouts from the remaining budget.
use resilience::Deadline;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub trace_id: String,
    pub user_id: String,
    pub deadline: Deadline,
}

impl RequestContext {
    pub fn new(user_id: impl Into<String>, budget: Duration) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            deadline: Deadline::after(budget),
        }
    }

    /// Keep a caller-provided correlation id instead of the generated one.
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    /// Context for internally-originated work (expiry, sweeps).
    pub fn internal(budget: Duration) -> Self {
        Self::new("system", budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_a_trace_id() {
        let ctx = RequestContext::new("user-1", Duration::from_millis(600));
        assert!(!ctx.trace_id.is_empty());
        assert_eq!(ctx.user_id, "user-1");
    }

    #[test]
    fn caller_trace_id_wins() {
        let ctx = RequestContext::new("user-1", Duration::from_millis(600))
            .with_trace_id("trace-from-gateway");
        assert_eq!(ctx.trace_id, "trace-from-gateway");
    }
}

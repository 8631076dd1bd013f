use std::time::Duration;

use tracing::{debug, info, warn};

use super::{FilterOutcome, Middleware};
use crate::context::{Context, Response};
use crate::errors::DispatchError;

/// Emits a structured event when a routed request starts and when it finishes.
///
/// Both events carry the request id, so they line up with the dispatcher's
/// own `Request dispatched` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMiddleware {
    /// Latency above which the finish event is logged at WARN.
    pub slow_threshold: Option<Duration>,
}

impl TracingMiddleware {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = Some(threshold);
        self
    }
}

impl Middleware for TracingMiddleware {
    fn before(&self, ctx: &mut Context<'_>) -> Result<FilterOutcome, DispatchError> {
        // T1: Request started
        debug!(
            request_id = %ctx.request_id(),
            method = %ctx.method(),
            path = %ctx.path(),
            route = ctx.route_pattern().unwrap_or_default(),
            remote_addr = ?ctx.remote_addr(),
            "Request started"
        );
        Ok(FilterOutcome::Continue)
    }

    fn after(&self, ctx: &mut Context<'_>, res: &mut Response, latency: Duration) {
        let status = if res.is_streamed() { ctx.status() } else { res.status };
        let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        let slow = self.slow_threshold.is_some_and(|t| latency > t);
        if slow {
            // T3: Slow request
            warn!(
                request_id = %ctx.request_id(),
                method = %ctx.method(),
                route = ctx.route_pattern().unwrap_or_default(),
                status = status.as_u16(),
                latency_ms,
                "Slow request"
            );
        } else {
            // T2: Request finished
            info!(
                request_id = %ctx.request_id(),
                method = %ctx.method(),
                route = ctx.route_pattern().unwrap_or_default(),
                status = status.as_u16(),
                latency_ms,
                "Request finished"
            );
        }
    }
}

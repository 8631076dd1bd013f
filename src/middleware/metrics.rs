use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use http::header::{HeaderValue, CONTENT_TYPE};

use super::{FilterOutcome, Middleware};
use crate::context::{Context, Response};
use crate::dispatcher::HandlerResult;
use crate::errors::DispatchError;

/// Counters for a single route pattern.
#[derive(Debug, Default)]
pub struct RouteStats {
    requests: AtomicU64,
    errors: AtomicU64,
    total_latency_ns: AtomicU64,
}

impl RouteStats {
    #[must_use]
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Responses with a 5xx status.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn average_latency(&self) -> Duration {
        match self.requests() {
            0 => Duration::ZERO,
            n => Duration::from_nanos(self.total_latency_ns.load(Ordering::Relaxed) / n),
        }
    }
}

/// Middleware for collecting Prometheus-compatible metrics
///
/// All counters are atomics; per-route counters live in a `DashMap` keyed by
/// route pattern so concurrent requests on different routes do not contend.
/// Pre-register the table's patterns with [`preregister`](Self::preregister)
/// so every route shows up in the output before its first request.
pub struct MetricsMiddleware {
    request_count: AtomicUsize,
    in_flight: AtomicUsize,
    total_latency_ns: AtomicU64,
    /// Index 0 = 1xx ... index 4 = 5xx.
    status_classes: [AtomicU64; 5],
    routes: DashMap<Arc<str>, RouteStats>,
}

impl Default for MetricsMiddleware {
    fn default() -> Self {
        Self {
            request_count: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            total_latency_ns: AtomicU64::new(0),
            status_classes: Default::default(),
            routes: DashMap::new(),
        }
    }
}

impl MetricsMiddleware {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create zeroed entries for each route pattern.
    pub fn preregister<I, S>(&self, patterns: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pattern in patterns {
            self.routes
                .entry(Arc::from(pattern.as_ref()))
                .or_default();
        }
    }

    /// Get the total number of requests that reached a route
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Requests past their before-hook but not yet through their after-hook.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Calculate the average request latency
    ///
    /// Returns zero duration if no requests have completed yet.
    #[must_use]
    pub fn average_latency(&self) -> Duration {
        let completed: u64 = self.status_classes.iter().map(|c| c.load(Ordering::Relaxed)).sum();
        if completed == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.total_latency_ns.load(Ordering::Relaxed) / completed)
        }
    }

    /// Responses whose status falls in `class` (1..=5).
    #[must_use]
    pub fn status_class_count(&self, class: u16) -> u64 {
        match class {
            1..=5 => self.status_classes[usize::from(class - 1)].load(Ordering::Relaxed),
            _ => 0,
        }
    }

    /// Snapshot of `(requests, errors)` for one route pattern.
    #[must_use]
    pub fn route_counts(&self, pattern: &str) -> Option<(u64, u64)> {
        self.routes
            .get(pattern)
            .map(|stats| (stats.requests(), stats.errors()))
    }

    #[must_use]
    pub fn route_patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self.routes.iter().map(|e| e.key().to_string()).collect();
        patterns.sort();
        patterns
    }

    /// Render all counters in Prometheus text exposition format.
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        let mut out = String::with_capacity(1024);
        match self.write_prometheus(&mut out) {
            Ok(()) => out,
            Err(_) => String::new(),
        }
    }

    /// Write all counters in Prometheus text exposition format to `out`.
    pub fn write_prometheus<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        out.write_str("# HELP brrtcore_requests_total Requests that matched a route\n")?;
        out.write_str("# TYPE brrtcore_requests_total counter\n")?;
        writeln!(out, "brrtcore_requests_total {}", self.request_count())?;

        out.write_str("# HELP brrtcore_requests_in_flight Requests currently being handled\n")?;
        out.write_str("# TYPE brrtcore_requests_in_flight gauge\n")?;
        writeln!(out, "brrtcore_requests_in_flight {}", self.in_flight())?;

        out.write_str("# HELP brrtcore_request_latency_seconds Average request latency\n")?;
        out.write_str("# TYPE brrtcore_request_latency_seconds gauge\n")?;
        writeln!(
            out,
            "brrtcore_request_latency_seconds {:.6}",
            self.average_latency().as_secs_f64()
        )?;

        out.write_str("# HELP brrtcore_responses_total Responses by status class\n")?;
        out.write_str("# TYPE brrtcore_responses_total counter\n")?;
        for class in 1..=5u16 {
            writeln!(
                out,
                "brrtcore_responses_total{{class=\"{class}xx\"}} {}",
                self.status_class_count(class)
            )?;
        }

        out.write_str("# HELP brrtcore_route_requests_total Requests per route pattern\n")?;
        out.write_str("# TYPE brrtcore_route_requests_total counter\n")?;
        let mut routes: Vec<(String, u64, u64, Duration)> = self
            .routes
            .iter()
            .map(|e| {
                (
                    e.key().to_string(),
                    e.value().requests(),
                    e.value().errors(),
                    e.value().average_latency(),
                )
            })
            .collect();
        routes.sort_by(|a, b| a.0.cmp(&b.0));
        for (path, requests, _, _) in &routes {
            writeln!(out, "brrtcore_route_requests_total{{path=\"{path}\"}} {requests}")?;
        }
        out.write_str("# HELP brrtcore_route_errors_total 5xx responses per route pattern\n")?;
        out.write_str("# TYPE brrtcore_route_errors_total counter\n")?;
        for (path, _, errors, _) in &routes {
            writeln!(out, "brrtcore_route_errors_total{{path=\"{path}\"}} {errors}")?;
        }
        out.write_str("# HELP brrtcore_route_latency_seconds Average latency per route pattern\n")?;
        out.write_str("# TYPE brrtcore_route_latency_seconds gauge\n")?;
        for (path, _, _, latency) in &routes {
            writeln!(
                out,
                "brrtcore_route_latency_seconds{{path=\"{path}\"}} {:.6}",
                latency.as_secs_f64()
            )?;
        }
        Ok(())
    }

    /// Handler serving [`render_prometheus`](Self::render_prometheus), for a `/metrics` route.
    pub fn handler(
        self: &Arc<Self>,
    ) -> impl Fn(&mut Context<'_>) -> HandlerResult + Send + Sync + 'static {
        let metrics = Arc::clone(self);
        move |_ctx| {
            Ok(Response::text(metrics.render_prometheus()).with_header(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            ))
        }
    }
}

impl Middleware for MetricsMiddleware {
    fn before(&self, _ctx: &mut Context<'_>) -> Result<FilterOutcome, DispatchError> {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        Ok(FilterOutcome::Continue)
    }

    fn after(&self, ctx: &mut Context<'_>, res: &mut Response, latency: Duration) {
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.total_latency_ns.fetch_add(nanos, Ordering::Relaxed);
        // saturate at zero: `after` can run for requests `before` never saw
        if self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_err()
        {
            tracing::trace!("in-flight gauge already at zero");
        }

        let status = if res.is_streamed() { ctx.status() } else { res.status };
        let class = usize::from(status.as_u16() / 100).clamp(1, 5);
        self.status_classes[class - 1].fetch_add(1, Ordering::Relaxed);

        if let Some(pattern) = ctx.route_pattern() {
            let stats = self.routes.entry(Arc::from(pattern)).or_default();
            stats.requests.fetch_add(1, Ordering::Relaxed);
            stats.total_latency_ns.fetch_add(nanos, Ordering::Relaxed);
            if status.is_server_error() {
                stats.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

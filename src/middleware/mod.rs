//! # Middleware Module
//!
//! Before/after filters and the [`Middleware`] trait that bundles both.
//!
//! Filters are registered on the [`RouterBuilder`](crate::router::RouterBuilder),
//! optionally scoped to a path prefix, and run only for requests that matched
//! a route:
//!
//! ```text
//! before filters (registration order) ─► handler ─► after filters (registration order)
//!        │ Halt(response)                  │ Err             ▲
//!        └─────────────────────────────────┴──► exception ───┘
//!                                              mapping
//! ```
//!
//! A before-filter returning [`FilterOutcome::Halt`] skips the remaining
//! before-filters and the handler. After-filters always run, including after
//! a halt or an error, and may rewrite the pending [`Response`](crate::context::Response).
//!
//! ## Built-ins
//!
//! - [`MetricsMiddleware`]: request counts and latency, overall and per route
//! - [`TracingMiddleware`]: structured start/finish events per request

mod core;
mod metrics;
mod tracing;

pub use self::core::{AfterFilter, BeforeFilter, FilterOutcome, Middleware};
pub(crate) use self::core::{AfterHook, BeforeHook};
pub use metrics::{MetricsMiddleware, RouteStats};
pub use self::tracing::TracingMiddleware;

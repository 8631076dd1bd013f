//! Dispatcher core module - hot path for request dispatch.
//!
//! Allocation on this path is limited to what error rendering needs; the
//! lints below keep accidental copies out of the common case.

#![deny(clippy::inefficient_to_string)]
#![deny(clippy::format_push_string)]
#![deny(clippy::unnecessary_to_owned)]

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use smallvec::SmallVec;
use tracing::{debug, error, info, warn};

use crate::codec::{JsonCodec, SerdeJsonCodec};
use crate::config::DispatchConfig;
use crate::context::{Context, Response};
use crate::errors::{
    default_response, internal_error_response, Category, DispatchError, ExceptionRegistry,
    HttpError,
};
use crate::exchange::Exchange;
use crate::ids::RequestId;
use crate::middleware::{AfterFilter, BeforeFilter, FilterOutcome};
use crate::router::{RoleSet, RouteError, RouteTable, RouterBuilder};

/// Filters applying to one request; most requests see only a few.
type FilterList<F> = SmallVec<[Arc<F>; 8]>;

/// What a handler returns.
pub type HandlerResult = Result<Response, DispatchError>;

/// A route handler.
///
/// Implemented for every `Fn(&mut Context<'_>) -> HandlerResult`, so plain
/// closures and functions can be registered directly.
pub trait Handler: Send + Sync {
    fn handle(&self, ctx: &mut Context<'_>) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&mut Context<'_>) -> HandlerResult + Send + Sync,
{
    fn handle(&self, ctx: &mut Context<'_>) -> HandlerResult {
        self(ctx)
    }
}

/// Decides whether the caller may invoke a route requiring `roles`.
///
/// Runs after the before-filters, immediately before the handler. A rejection
/// is an ordinary dispatch error, usually [`HttpError::unauthorized`] or
/// [`HttpError::forbidden`].
pub trait AccessManager: Send + Sync {
    fn check(&self, ctx: &mut Context<'_>, roles: &RoleSet) -> Result<(), DispatchError>;
}

impl<F> AccessManager for F
where
    F: Fn(&mut Context<'_>, &RoleSet) -> Result<(), DispatchError> + Send + Sync,
{
    fn check(&self, ctx: &mut Context<'_>, roles: &RoleSet) -> Result<(), DispatchError> {
        self(ctx, roles)
    }
}

/// Where a request currently is in the dispatch state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Routing,
    BeforeFilters,
    Handler,
    Error,
    AfterFilters,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Routing => "routing",
            Phase::BeforeFilters => "before_filters",
            Phase::Handler => "handler",
            Phase::Error => "error",
            Phase::AfterFilters => "after_filters",
            Phase::Done => "done",
        })
    }
}

/// Summary of one dispatched request, for transports and tests.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub request_id: RequestId,
    /// Status actually sent (or that would have been sent, for a truncated stream).
    pub status: StatusCode,
    /// Pattern of the matched route, `None` on a routing miss.
    pub route: Option<String>,
    /// Category of the error that was mapped, if any.
    pub error: Option<Category>,
    /// The response was cut short after its headers went out.
    pub truncated: bool,
    pub elapsed: Duration,
}

/// The dispatch engine.
///
/// Holds the immutable route table, exception registry and configuration.
/// Cloning is cheap; every clone shares the same tables.
#[derive(Clone)]
pub struct Dispatcher {
    routes: Arc<RouteTable>,
    exceptions: Arc<ExceptionRegistry>,
    config: Arc<DispatchConfig>,
    codec: Arc<dyn JsonCodec>,
    access: Option<Arc<dyn AccessManager>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.routes)
            .field("exceptions", &self.exceptions)
            .field("config", &self.config)
            .field("access_manager", &self.access.is_some())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new(routes: RouteTable) -> Self {
        Self {
            routes: Arc::new(routes),
            exceptions: Arc::new(ExceptionRegistry::new()),
            config: Arc::new(DispatchConfig::default()),
            codec: Arc::new(SerdeJsonCodec::default()),
            access: None,
        }
    }

    #[must_use]
    pub fn with_exceptions(mut self, exceptions: ExceptionRegistry) -> Self {
        self.exceptions = Arc::new(exceptions);
        self
    }

    /// Build the route table and the dispatcher from one configuration.
    ///
    /// `register` receives a builder already honouring `config.router`.
    ///
    /// # Errors
    ///
    /// Returns the first registration error raised by `register`.
    pub fn from_config<F>(config: DispatchConfig, register: F) -> Result<Self, RouteError>
    where
        F: FnOnce(&mut RouterBuilder) -> Result<(), RouteError>,
    {
        let mut builder = RouterBuilder::with_config(&config.router);
        register(&mut builder)?;
        Ok(Self::new(builder.build()).with_config(config))
    }

    /// Replace the dispatch-time configuration.
    ///
    /// The route table is already built, so `config.router` has no effect
    /// here; pass it to [`RouterBuilder::with_config`] or use
    /// [`Dispatcher::from_config`].
    #[must_use]
    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn JsonCodec>) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub fn with_access_manager(mut self, access: Arc<dyn AccessManager>) -> Self {
        self.access = Some(access);
        self
    }

    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Run one request to completion.
    ///
    /// Never fails: every error is mapped to a response, or, once headers are
    /// out, to a truncated and closed exchange.
    pub fn dispatch(&self, exchange: &mut dyn Exchange) -> DispatchOutcome {
        let mut ctx = Context::new(exchange, &self.config, self.codec.as_ref());

        // D1: Dispatch started
        debug!(
            request_id = %ctx.request_id(),
            method = %ctx.method(),
            path = %ctx.path(),
            "Dispatch started"
        );

        let Some(route) = self.routes.match_route(ctx.method(), ctx.path()) else {
            // routing misses skip every filter
            let err = DispatchError::from(HttpError::not_found());
            let category = err.category();
            let response = self.handle_error(&mut ctx, err);
            return self.finish(ctx, response, Some(category));
        };

        let entry = Arc::clone(&route.entry);
        ctx.set_route(route);

        let mut failure: Option<Category> = None;
        let mut response = self.run_before(&mut ctx, &mut failure);
        if response.is_none() {
            ctx.set_phase(Phase::Handler);
            let result = contain(&mut ctx, |ctx| {
                if let Some(access) = &self.access {
                    access.check(ctx, &entry.roles)?;
                }
                entry.handler.handle(ctx)
            });
            response = Some(match result {
                Ok(res) => res,
                Err(err) => {
                    failure = Some(err.category());
                    self.handle_error(&mut ctx, err)
                }
            });
        }
        let mut response = response.unwrap_or_else(Response::streamed);

        self.run_after(&mut ctx, &mut response, &mut failure);
        self.finish(ctx, response, failure)
    }

    /// Before-filters in registration order. `Some` ends the chain.
    fn run_before(&self, ctx: &mut Context<'_>, failure: &mut Option<Category>) -> Option<Response> {
        ctx.set_phase(Phase::BeforeFilters);
        let filters: FilterList<dyn BeforeFilter> = self
            .routes
            .before_filters(ctx.path())
            .map(|f| Arc::clone(&f.filter))
            .collect();

        for filter in filters {
            match contain(ctx, |ctx| filter.before(ctx)) {
                Ok(FilterOutcome::Continue) => {}
                Ok(FilterOutcome::Halt(response)) => {
                    // D2: Before-filter halted the chain
                    debug!(
                        request_id = %ctx.request_id(),
                        status = response.status.as_u16(),
                        "Before-filter halted request"
                    );
                    return Some(response);
                }
                Err(err) => {
                    *failure = Some(err.category());
                    return Some(self.handle_error(ctx, err));
                }
            }
        }
        None
    }

    /// After-filters always run for a routed request, even after an error.
    fn run_after(
        &self,
        ctx: &mut Context<'_>,
        response: &mut Response,
        failure: &mut Option<Category>,
    ) {
        let filters: FilterList<dyn AfterFilter> = self
            .routes
            .after_filters(ctx.path())
            .map(|f| Arc::clone(&f.filter))
            .collect();
        ctx.set_phase(Phase::AfterFilters);

        for filter in filters {
            if let Err(err) = contain(ctx, |ctx| filter.after(ctx, response)) {
                // D3: After-filter failed; its error replaces the response
                warn!(
                    request_id = %ctx.request_id(),
                    category = %err.category(),
                    "After-filter failed"
                );
                *failure = Some(err.category());
                *response = self.handle_error(ctx, err);
                ctx.set_phase(Phase::AfterFilters);
            }
        }
    }

    /// Map `err` to a response through the exception registry.
    fn handle_error(&self, ctx: &mut Context<'_>, err: DispatchError) -> Response {
        ctx.set_phase(Phase::Error);

        if ctx.headers_sent() {
            // E4: Nothing left to say once headers are out
            warn!(
                request_id = %ctx.request_id(),
                category = %err.category(),
                error = %err,
                "Error after response headers were sent, truncating"
            );
            ctx.mark_truncated();
            return Response::streamed();
        }

        if let Some((category, handler)) = self.exceptions.find(&err) {
            // E1: Registered exception handler
            debug!(
                request_id = %ctx.request_id(),
                error_category = %err.category(),
                handler_category = %category,
                "Invoking exception handler"
            );
            return match contain(ctx, |ctx| handler.handle(&err, ctx)) {
                Ok(response) => response,
                Err(failure) => {
                    // E2: The exception handler itself failed
                    error!(
                        request_id = %ctx.request_id(),
                        original = %err,
                        error = %failure,
                        debug = ?failure,
                        "Exception handler failed"
                    );
                    if ctx.headers_sent() {
                        ctx.mark_truncated();
                        Response::streamed()
                    } else {
                        internal_error_response(ctx.accepts_json())
                    }
                }
            };
        }

        // E3: Default mapping
        match err.status() {
            Some(status) if !status.is_server_error() => debug!(
                request_id = %ctx.request_id(),
                status = status.as_u16(),
                error = %err,
                "Unhandled HTTP error, default mapping"
            ),
            _ => error!(
                request_id = %ctx.request_id(),
                category = %err.category(),
                error = %err,
                debug = ?err,
                "Unhandled error, responding 500"
            ),
        }
        default_response(&err, ctx.accepts_json())
    }

    fn finish(
        &self,
        mut ctx: Context<'_>,
        response: Response,
        error: Option<Category>,
    ) -> DispatchOutcome {
        let streamed = response.is_streamed();
        let mut status = response.status;

        if let Err(err) = ctx.commit(response) {
            if ctx.headers_sent() {
                // D4: Commit failed mid-body
                warn!(
                    request_id = %ctx.request_id(),
                    error = %err,
                    "Response commit failed after headers were sent"
                );
                ctx.mark_truncated();
            } else {
                error!(
                    request_id = %ctx.request_id(),
                    error = %err,
                    debug = ?err,
                    "Response commit failed, sending 500"
                );
                let fallback = internal_error_response(ctx.accepts_json());
                status = fallback.status;
                if let Err(e) = ctx.commit(fallback) {
                    warn!(request_id = %ctx.request_id(), error = %e, "Fallback response failed");
                    ctx.mark_truncated();
                }
            }
        }
        if streamed || ctx.is_truncated() {
            status = ctx.status();
        }
        if ctx.is_truncated() {
            ctx.close();
        }
        ctx.set_phase(Phase::Done);

        let elapsed = ctx.elapsed();
        let route = ctx.route_pattern().map(str::to_owned);
        // D9: Request dispatched
        info!(
            request_id = %ctx.request_id(),
            method = %ctx.method(),
            path = %ctx.path(),
            route_pattern = route.as_deref().unwrap_or_default(),
            status = status.as_u16(),
            truncated = ctx.is_truncated(),
            duration_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            "Request dispatched"
        );

        DispatchOutcome {
            request_id: ctx.request_id(),
            status,
            route,
            error,
            truncated: ctx.is_truncated(),
            elapsed,
        }
    }
}

/// Run user code, turning a panic into [`DispatchError::Panic`].
fn contain<'c, 'a, T>(
    ctx: &'c mut Context<'a>,
    f: impl FnOnce(&mut Context<'a>) -> Result<T, DispatchError>,
) -> Result<T, DispatchError> {
    let request_id = ctx.request_id();
    let phase = ctx.phase();
    match catch_unwind(AssertUnwindSafe(|| f(ctx))) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            // H3: Handler panicked
            error!(
                request_id = %request_id,
                phase = %phase,
                panic = %message,
                "Panic during dispatch"
            );
            Err(DispatchError::Panic(message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MemoryExchange;

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::BeforeFilters.to_string(), "before_filters");
        assert_eq!(Phase::Done.to_string(), "done");
    }

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "non-string panic payload");
    }

    #[test]
    fn test_routing_miss_is_404_without_route() {
        let dispatcher = Dispatcher::new(RouterBuilder::new().build());
        let mut ex = MemoryExchange::get("/nowhere");
        let outcome = dispatcher.dispatch(&mut ex);
        assert_eq!(outcome.status, StatusCode::NOT_FOUND);
        assert!(outcome.route.is_none());
        assert_eq!(outcome.error.as_ref().map(Category::as_str), Some("http.client.404"));
    }

    #[test]
    fn test_panicking_handler_is_500_without_leak() {
        let mut routes = RouterBuilder::new();
        routes
            .get("/boom", |_ctx: &mut Context<'_>| -> HandlerResult {
                panic!("secret detail")
            })
            .unwrap();
        let dispatcher = Dispatcher::new(routes.build());
        let mut ex = MemoryExchange::get("/boom");
        let outcome = dispatcher.dispatch(&mut ex);
        assert_eq!(outcome.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(outcome.error, Some(Category::PANIC));
        assert!(!ex.response_text().contains("secret"));
    }

    #[test]
    fn test_access_manager_rejects() {
        let mut routes = RouterBuilder::new();
        routes
            .add_with_roles(
                crate::router::RouteKind::Get,
                "/admin",
                ["admin"],
                |_ctx: &mut Context<'_>| Ok(Response::text("secret")),
            )
            .unwrap();
        let dispatcher = Dispatcher::new(routes.build()).with_access_manager(Arc::new(
            |_ctx: &mut Context<'_>, roles: &RoleSet| -> Result<(), DispatchError> {
                if roles.is_empty() {
                    Ok(())
                } else {
                    Err(HttpError::forbidden().into())
                }
            },
        ));
        let mut ex = MemoryExchange::get("/admin");
        let outcome = dispatcher.dispatch(&mut ex);
        assert_eq!(outcome.status, StatusCode::FORBIDDEN);
        assert!(!ex.response_text().contains("secret"));
    }
}

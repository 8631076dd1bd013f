//! # brrtcore
//!
//! **brrtcore** is a transport-agnostic routing and request-dispatch core for
//! embeddable HTTP servers. It owns everything between "a request arrived"
//! and "the response bytes left": route matching, filter chains, exception
//! mapping and streaming response helpers. The transport only has to
//! implement the small [`exchange::Exchange`] contract.
//!
//! ## Architecture
//!
//! - **[`router`]** - path-pattern compiler, per-method route index bucketed
//!   by segment count, filter registration
//! - **[`dispatcher`]** - the per-request state machine: routing, before
//!   filters, handler, error mapping, after filters
//! - **[`context`]** - the per-request view handed to handlers and filters
//! - **[`errors`]** - the dispatch error type, error categories and the
//!   exception registry
//! - **[`middleware`]** - filter traits plus metrics and tracing middleware
//! - **[`stream`]** - conditional compression and byte-range serving
//! - **[`sse`]** - Server-Sent Events sessions with a keep-alive hand-off
//! - **[`exchange`]** - the transport contract and an in-memory implementation
//! - **[`server`]** - a minimal HTTP/1.1 transport on the `may` runtime
//! - **[`codec`]** - the JSON codec boundary
//! - **[`config`]**, **[`runtime_config`]**, **[`telemetry`]** - configuration
//!   and logging setup
//!
//! ### Request Handling Flow
//!
//! ```mermaid
//! stateDiagram-v2
//!     [*] --> Routing
//!     Routing --> Done: no route (404, no filters)
//!     Routing --> BeforeFilters
//!     BeforeFilters --> AfterFilters: Halt(response)
//!     BeforeFilters --> Error: filter error
//!     BeforeFilters --> Handler
//!     Handler --> Error: handler error or panic
//!     Handler --> AfterFilters
//!     Error --> AfterFilters
//!     AfterFilters --> Done
//!     Done --> [*]
//! ```
//!
//! The route table and exception registry are built once and are read-only
//! afterwards; a [`dispatcher::Dispatcher`] can be cloned into every
//! connection coroutine without locking.
//!
//! ## Quick Start
//!
//! ```
//! use brrtcore::context::Response;
//! use brrtcore::dispatcher::Dispatcher;
//! use brrtcore::errors::{ExceptionRegistry, HttpError};
//! use brrtcore::exchange::MemoryExchange;
//! use brrtcore::middleware::FilterOutcome;
//! use brrtcore::router::RouterBuilder;
//!
//! let mut routes = RouterBuilder::new();
//! routes
//!     .get("/pets/{id}", |ctx| {
//!         let id = ctx.path_param("id")?;
//!         Ok(Response::json(serde_json::json!({ "id": id })))
//!     })?
//!     .before_path("/admin", |_ctx| Err(HttpError::forbidden().into()))?
//!     .before(|_ctx| Ok(FilterOutcome::Continue))?;
//!
//! let mut exceptions = ExceptionRegistry::new();
//! exceptions.register("http.client", |err, _ctx| {
//!     Ok(Response::text(format!("client error: {err}")).with_status(err.status().unwrap_or_default()))
//! });
//!
//! let dispatcher = Dispatcher::new(routes.build()).with_exceptions(exceptions);
//! let mut exchange = MemoryExchange::get("/pets/7");
//! let outcome = dispatcher.dispatch(&mut exchange);
//! assert_eq!(outcome.status, 200);
//! assert_eq!(exchange.response_text(), r#"{"id":"7"}"#);
//! # Ok::<(), brrtcore::router::RouteError>(())
//! ```
//!
//! ## Runtime Considerations
//!
//! The bundled [`server`] uses the `may` coroutine runtime, not tokio. Each
//! connection is served by one coroutine whose stack size comes from
//! `BRRTR_STACK_SIZE`. The dispatcher itself never spawns and never blocks,
//! except inside [`sse::SseSession::keep_alive`], which parks the handling
//! coroutine until another task closes the stream.
//!
//! ## Logging
//!
//! All components log through `tracing`. Call
//! [`telemetry::init_logging_with_config`] once at start-up (configured
//! through `BRRTR_LOG_*` variables) and keep the returned guard alive.

pub mod codec;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod errors;
pub mod exchange;
pub mod ids;
pub mod middleware;
pub mod router;
pub mod runtime_config;
pub mod server;
pub mod sse;
pub mod stream;
pub mod telemetry;

pub use context::{Body, Context, Response};
pub use dispatcher::{DispatchOutcome, Dispatcher, Handler, HandlerResult};
pub use errors::{DispatchError, HttpError};
pub use router::{RouteTable, RouterBuilder};

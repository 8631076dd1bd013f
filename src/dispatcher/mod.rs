//! # Dispatcher Module
//!
//! The dispatch engine: drives one [`Exchange`](crate::exchange::Exchange)
//! from route resolution to a committed response.
//!
//! ## Request Flow
//!
//! ```text
//! ROUTING ──miss──► ERROR (404 via exception registry) ──► commit
//!    │ hit
//!    ▼
//! BEFORE_FILTERS ──Halt──────────────────────────┐
//!    │ continue            Err ──► ERROR ──┐      │
//!    ▼                                     ▼      ▼
//! HANDLER (access check, then handler) ──► AFTER_FILTERS ──► commit ──► DONE
//!                          Err ──► ERROR ──┘
//! ```
//!
//! - Filters run only when a route matched; a 404 skips them entirely
//! - After-filters always run once a route matched, even after a halt or
//!   an error, and may rewrite the pending response
//! - Every error goes through the [`ExceptionRegistry`](crate::errors::ExceptionRegistry);
//!   if the chosen exception handler fails too, a generic 500 is sent
//! - Panics in handlers, filters and exception handlers are contained and
//!   treated as errors in category `panic`
//! - Once headers are on the wire, errors can no longer change the response;
//!   the exchange is closed and the request logged as truncated
//!
//! ## Example
//!
//! ```rust
//! use brrtcore::context::Response;
//! use brrtcore::dispatcher::Dispatcher;
//! use brrtcore::exchange::MemoryExchange;
//! use brrtcore::router::RouteTable;
//!
//! let mut routes = RouteTable::builder();
//! routes.get("/hello/{name}", |ctx| {
//!     let name = ctx.path_param("name")?;
//!     Ok(Response::text(format!("hello {name}")))
//! }).unwrap();
//!
//! let dispatcher = Dispatcher::new(routes.build());
//! let mut exchange = MemoryExchange::get("/hello/world");
//! let outcome = dispatcher.dispatch(&mut exchange);
//! assert_eq!(outcome.status.as_u16(), 200);
//! assert_eq!(exchange.response_text(), "hello world");
//! ```

mod core;

pub use self::core::{AccessManager, DispatchOutcome, Dispatcher, Handler, HandlerResult, Phase};

//! # Server Module
//!
//! A small HTTP/1.1 transport for the dispatcher, built on the `may`
//! coroutine runtime.
//!
//! - [`StreamExchange`]: an [`Exchange`](crate::exchange::Exchange) over any
//!   buffered byte stream, one request per connection
//! - [`HttpServer`]: accept loop spawning one coroutine per connection
//! - [`ServerHandle`]: readiness, shutdown and join
//!
//! Request bodies must carry `Content-Length`; chunked uploads are answered
//! with `501`. Malformed heads get a plain-text `400` without reaching the
//! dispatcher.
//!
//! ```no_run
//! use brrtcore::dispatcher::Dispatcher;
//! use brrtcore::context::Response;
//! use brrtcore::router::RouterBuilder;
//! use brrtcore::server::HttpServer;
//!
//! let mut routes = RouterBuilder::new();
//! routes.get("/health", |_ctx| Ok(Response::text("ok")))?;
//! let handle = HttpServer::new(Dispatcher::new(routes.build())).start("127.0.0.1:8080")?;
//! handle.wait_ready()?;
//! handle.join().ok();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod exchange;
mod http_server;
mod request;

pub use exchange::{write_error_response, StreamExchange};
pub use http_server::{HttpServer, ServerHandle};
pub use request::{read_head, split_target, RequestError, RequestHead, RequestLimits};

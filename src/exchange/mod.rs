//! # Exchange Module
//!
//! The seam between the dispatch core and whatever transport carries the
//! bytes. An [`Exchange`] is one request/response pair: the request side is
//! read-only (method, path, query, headers, body), the response side is a
//! status plus a header map that is written to the wire exactly once, followed
//! by an output stream.
//!
//! ## Header commit rule
//!
//! [`Exchange::send_headers`] may succeed only once per exchange. A second
//! call returns [`ExchangeError::HeadersAlreadySent`]. The body stream is only
//! available after headers are sent. Everything in the crate that writes a
//! body (buffered commit, compression, ranges, SSE) goes through this rule.
//!
//! ## Implementations
//!
//! - [`MemoryExchange`]: fully in-memory, for tests and embedding
//! - [`crate::server::StreamExchange`]: HTTP/1.1 over a `may` TCP stream

mod memory;

use std::io::{self, Read, Write};
use std::net::SocketAddr;

use http::{Extensions, HeaderMap, Method, StatusCode, Version};
use thiserror::Error;

pub use memory::{MemoryExchange, SharedBuffer};

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("response headers have already been sent")]
    HeadersAlreadySent,
    #[error("response headers have not been sent yet")]
    HeadersNotSent,
    #[error("exchange is closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One HTTP request/response pair as seen by the dispatcher.
pub trait Exchange: Send {
    fn method(&self) -> &Method;
    /// Request path, without the query string. Not percent-decoded.
    fn path(&self) -> &str;
    /// Raw query string, without the leading `?`.
    fn query(&self) -> Option<&str>;
    fn version(&self) -> Version;
    fn request_headers(&self) -> &HeaderMap;
    fn remote_addr(&self) -> Option<SocketAddr>;
    /// Request body stream. Reading it more than once yields nothing new.
    fn request_body(&mut self) -> &mut dyn Read;

    fn status(&self) -> StatusCode;
    /// Fails with [`ExchangeError::HeadersAlreadySent`] once the head is on the wire.
    fn set_status(&mut self, status: StatusCode) -> Result<(), ExchangeError>;
    fn response_headers(&self) -> &HeaderMap;
    /// Pending response headers. Changes after [`send_headers`](Self::send_headers) have no effect.
    fn response_headers_mut(&mut self) -> &mut HeaderMap;

    fn headers_sent(&self) -> bool;
    /// Write status line and headers. Succeeds at most once.
    fn send_headers(&mut self) -> Result<(), ExchangeError>;
    /// Body stream. Requires headers to have been sent.
    fn output(&mut self) -> Result<&mut dyn Write, ExchangeError>;
    /// Hand the body stream to an owner that outlives this borrow (SSE).
    ///
    /// The exchange keeps working; both handles write to the same stream.
    fn detach_output(&mut self) -> Result<Box<dyn Write + Send>, ExchangeError>;

    /// Per-request attribute bag shared by filters and handlers.
    fn attributes(&self) -> &Extensions;
    fn attributes_mut(&mut self) -> &mut Extensions;

    /// Flush and release the exchange. Idempotent.
    fn close(&mut self) -> io::Result<()>;
    fn is_closed(&self) -> bool;
}

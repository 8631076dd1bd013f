//! # Server-Sent Events (SSE) Module
//!
//! Streams `text/event-stream` responses over a live exchange.
//!
//! ## Architecture
//!
//! - **[`Emitter`]**: mutex-guarded writer producing the SSE wire format.
//!   Every event and comment is flushed immediately. The first I/O failure
//!   closes it for good.
//! - **[`SseClient`]**: cheap, cloneable, `Send` handle used to push events,
//!   possibly from another coroutine or thread.
//! - **[`SseSession`]**: returned by [`Context::sse`]. Owns the release
//!   signal for [`keep_alive`](SseSession::keep_alive).
//!
//! ## Hand-off
//!
//! A handler that wants to stream from elsewhere hands out a client and then
//! parks itself in `keep_alive()`. The request coroutine stays blocked until
//! some holder of the client calls [`SseClient::close`] (or a send fails
//! because the peer went away). If the handler returns without calling
//! `keep_alive`, the session closes when it is dropped.
//!
//! ```rust,ignore
//! builder.get("/events", |ctx| {
//!     let session = ctx.sse()?;
//!     let client = session.client();
//!     may::go!(move || {
//!         for i in 0..10 {
//!             if client.send(Event::new("tick", i.to_string()).with_id(i.to_string())).is_err() {
//!                 break;
//!             }
//!         }
//!         client.close();
//!     });
//!     session.keep_alive();
//!     Ok(Response::streamed())
//! })?;
//! ```
//!
//! ## Wire format
//!
//! ```text
//! id: 3
//! event: tick
//! data: first line
//! data: second line
//!
//! : a comment
//! ```

use std::io::{self, Write};
use std::mem;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use http::header::{HeaderName, HeaderValue, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Method, StatusCode};
use may::sync::{mpsc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::errors::DispatchError;
use crate::exchange::ExchangeError;
use crate::ids::RequestId;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SseError {
    #[error("SSE stream is closed")]
    Closed,
}

/// A dead event stream is a closed exchange: headers are already out, so the
/// dispatcher only truncates.
impl From<SseError> for DispatchError {
    fn from(err: SseError) -> Self {
        match err {
            SseError::Closed => DispatchError::Exchange(ExchangeError::Closed),
        }
    }
}

/// One event frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    pub id: Option<String>,
    pub event: Option<String>,
    pub retry: Option<u64>,
    pub data: String,
}

impl Event {
    /// Named event.
    #[must_use]
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
            ..Self::default()
        }
    }

    /// Unnamed event; browsers deliver it as `message`.
    #[must_use]
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_retry(mut self, millis: u64) -> Self {
        self.retry = Some(millis);
        self
    }

    /// Render the frame, terminated by a blank line.
    ///
    /// `id` and `event` are single-line fields; line breaks in them are
    /// dropped. Each line of `data` becomes its own `data:` line.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.data.len() + 32);
        if let Some(id) = &self.id {
            push_field(&mut out, "id", &single_line(id));
        }
        if let Some(event) = &self.event {
            push_field(&mut out, "event", &single_line(event));
        }
        if let Some(retry) = self.retry {
            push_field(&mut out, "retry", &retry.to_string());
        }
        for line in lines(&self.data) {
            push_field(&mut out, "data", line);
        }
        out.push('\n');
        out
    }
}

fn push_field(out: &mut String, field: &str, value: &str) {
    out.push_str(field);
    out.push_str(": ");
    out.push_str(value);
    out.push('\n');
}

fn single_line(value: &str) -> String {
    value.chars().filter(|c| *c != '\n' && *c != '\r').collect()
}

fn lines(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l))
}

fn encode_comment(comment: &str) -> String {
    let mut out = String::with_capacity(comment.len() + 4);
    for line in lines(comment) {
        push_field(&mut out, "", line);
    }
    out
}

struct EmitterState {
    out: Option<Box<dyn Write + Send>>,
}

/// Serialized SSE writer.
pub struct Emitter {
    state: Mutex<EmitterState>,
}

impl Emitter {
    #[must_use]
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            state: Mutex::new(EmitterState { out: Some(out) }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EmitterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn emit(&self, event: &Event) -> Result<(), SseError> {
        self.write_block(&event.encode())
    }

    pub fn emit_comment(&self, comment: &str) -> Result<(), SseError> {
        self.write_block(&encode_comment(comment))
    }

    /// Reconnection hint on its own; carries no data so no event fires.
    pub fn emit_retry(&self, millis: u64) -> Result<(), SseError> {
        let mut block = String::new();
        push_field(&mut block, "retry", &millis.to_string());
        block.push('\n');
        self.write_block(&block)
    }

    fn write_block(&self, block: &str) -> Result<(), SseError> {
        let mut state = self.lock();
        let Some(out) = state.out.as_mut() else {
            return Err(SseError::Closed);
        };
        let result = out.write_all(block.as_bytes()).and_then(|()| out.flush());
        if let Err(e) = result {
            // S3: sticky failure, the stream never reopens
            warn!(error = %e, "SSE write failed, closing stream");
            state.out = None;
            return Err(SseError::Closed);
        }
        Ok(())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().out.is_none()
    }

    /// Flush and drop the writer. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        let mut state = self.lock();
        match state.out.take() {
            Some(mut out) => {
                if let Err(e) = out.flush() {
                    debug!(error = %e, "SSE flush on close failed");
                }
                true
            }
            None => false,
        }
    }
}

type CloseCallback = Box<dyn FnOnce() + Send>;

struct Shared {
    emitter: Emitter,
    closed: AtomicBool,
    release: Mutex<Option<mpsc::Sender<()>>>,
    on_close: Mutex<Vec<CloseCallback>>,
    request_id: RequestId,
    remote_addr: Option<SocketAddr>,
}

/// Handle for pushing events into an open SSE stream.
#[derive(Clone)]
pub struct SseClient {
    shared: Arc<Shared>,
}

impl SseClient {
    /// Emit an event. After the stream has closed this always fails.
    pub fn send(&self, event: Event) -> Result<(), SseError> {
        if self.is_closed() {
            return Err(SseError::Closed);
        }
        let result = self.shared.emitter.emit(&event);
        if result.is_err() {
            self.close();
        }
        result
    }

    /// Shorthand for a named event.
    pub fn send_event(&self, event: &str, data: &str) -> Result<(), SseError> {
        self.send(Event::new(event, data))
    }

    pub fn send_comment(&self, comment: &str) -> Result<(), SseError> {
        if self.is_closed() {
            return Err(SseError::Closed);
        }
        let result = self.shared.emitter.emit_comment(comment);
        if result.is_err() {
            self.close();
        }
        result
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.shared.request_id
    }

    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.shared.remote_addr
    }

    /// Run `callback` once the stream closes; immediately if it already has.
    pub fn on_close<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut callbacks = self.shared.on_close.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            drop(callbacks);
            callback();
        } else {
            callbacks.push(Box::new(callback));
        }
    }

    /// Close the stream, run close callbacks and release a blocked
    /// [`SseSession::keep_alive`]. Idempotent.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.emitter.close();
        let callbacks = {
            let mut guard = self.shared.on_close.lock().unwrap_or_else(PoisonError::into_inner);
            mem::take(&mut *guard)
        };
        for callback in callbacks {
            callback();
        }
        let release = self
            .shared
            .release
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = release {
            if tx.send(()).is_err() {
                debug!(request_id = %self.shared.request_id, "SSE session no longer waiting");
            }
        }
        info!(request_id = %self.shared.request_id, "SSE stream closed");
    }
}

/// An open SSE stream bound to the request that created it.
pub struct SseSession {
    client: SseClient,
    released: mpsc::Receiver<()>,
}

impl SseSession {
    /// Wrap an already-committed event stream.
    #[must_use]
    pub fn new(out: Box<dyn Write + Send>, request_id: RequestId, remote_addr: Option<SocketAddr>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            client: SseClient {
                shared: Arc::new(Shared {
                    emitter: Emitter::new(out),
                    closed: AtomicBool::new(false),
                    release: Mutex::new(Some(tx)),
                    on_close: Mutex::new(Vec::new()),
                    request_id,
                    remote_addr,
                }),
            },
            released: rx,
        }
    }

    /// A handle that can outlive this borrow and cross threads.
    #[must_use]
    pub fn client(&self) -> SseClient {
        self.client.clone()
    }

    pub fn send(&self, event: Event) -> Result<(), SseError> {
        self.client.send(event)
    }

    pub fn send_comment(&self, comment: &str) -> Result<(), SseError> {
        self.client.send_comment(comment)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    pub fn close(&self) {
        self.client.close();
    }

    /// Block the calling coroutine until the stream is closed.
    pub fn keep_alive(self) {
        debug!(request_id = %self.client.request_id(), "SSE session parked");
        if self.released.recv().is_err() {
            debug!("SSE release signal dropped");
        }
    }
}

impl Drop for SseSession {
    fn drop(&mut self) {
        self.client.close();
    }
}

/// Commit SSE headers on `ctx` and take over its output stream.
///
/// A HEAD request gets the headers only; its session writes into a sink.
pub(crate) fn open(ctx: &mut Context<'_>) -> Result<SseSession, DispatchError> {
    if ctx.headers_sent() {
        return Err(ExchangeError::HeadersAlreadySent.into());
    }
    ctx.set_status(StatusCode::OK)?;
    ctx.set_header(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"))?;
    ctx.set_header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))?;
    ctx.set_header(X_ACCEL_BUFFERING, HeaderValue::from_static("no"))?;
    ctx.stamp_request_id();

    let request_id = ctx.request_id();
    let remote_addr = ctx.remote_addr();
    let retry = ctx.config().sse.retry_ms;
    let head_only = *ctx.method() == Method::HEAD;

    let exchange = ctx.exchange_mut();
    exchange.response_headers_mut().remove(CONTENT_LENGTH);
    exchange.send_headers()?;
    let out: Box<dyn Write + Send> = if head_only {
        Box::new(io::sink())
    } else {
        exchange.output()?.flush()?;
        exchange.detach_output()?
    };

    let session = SseSession::new(out, request_id, remote_addr);
    if let Some(millis) = retry {
        if session.client.shared.emitter.emit_retry(millis).is_err() {
            debug!(%request_id, "Client gone before SSE retry hint");
        }
    }
    info!(%request_id, "SSE stream opened");
    Ok(session)
}

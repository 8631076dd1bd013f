//! # Request Context
//!
//! [`Context`] is what handlers, filters and exception handlers see. It wraps
//! the transport [`Exchange`] for the duration of one dispatch and adds:
//!
//! - the matched route and lazily decoded path parameters
//! - lazily parsed query parameters
//! - a cached request body with JSON decoding through the configured codec
//! - a per-request attribute bag
//! - response-side helpers: status, headers, streaming output with
//!   compression, byte ranges and Server-Sent Events
//!
//! Handlers usually return a [`Response`] value; the dispatcher commits it
//! after the after-filters have had a chance to modify it. Handlers that
//! stream (via [`Context::output_stream`], [`Context::serve_range`] or
//! [`Context::sse`]) return [`Response::streamed`] instead.

use std::io::{Read, Seek};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::header::{HeaderName, HeaderValue, ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode, Version};
use once_cell::unsync::OnceCell;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::codec::{CodecError, JsonCodec};
use crate::config::DispatchConfig;
use crate::dispatcher::Phase;
use crate::errors::{DispatchError, HttpError};
use crate::exchange::{Exchange, ExchangeError};
use crate::ids::{RequestId, REQUEST_ID_HEADER};
use crate::router::{ParamVec, PatternError, RouteMatch};
use crate::sse::{self, SseSession};
use crate::stream::{compression, range, ResponseStream};

/// Response payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Bytes(Vec<u8>),
    Text(String),
    Json(Value),
    /// The handler already wrote the body through the exchange.
    Streamed,
}

/// A response value produced by a handler, filter or exception handler.
///
/// Headers set here are merged over any headers set on the [`Context`] and
/// win on conflict.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

impl Response {
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Body::Empty,
        }
    }

    /// `200 OK` with no body.
    #[must_use]
    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    /// `text/plain` body.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            body: Body::Text(text.into()),
            ..Self::ok()
        }
    }

    #[must_use]
    pub fn html(html: impl Into<String>) -> Self {
        Self::text(html).with_header(
            CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        )
    }

    /// `application/json` body, encoded by the dispatcher's codec at commit time.
    #[must_use]
    pub fn json(value: Value) -> Self {
        Self {
            body: Body::Json(value),
            ..Self::ok()
        }
    }

    /// Serialize `value` into a JSON response.
    pub fn json_from<T: Serialize>(value: &T) -> Result<Self, DispatchError> {
        let value = serde_json::to_value(value).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(Self::json(value))
    }

    /// Raw bytes, `application/octet-stream` unless a content type is set.
    #[must_use]
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            body: Body::Bytes(bytes.into()),
            ..Self::ok()
        }
    }

    /// Marker returned by handlers that wrote their own body.
    #[must_use]
    pub fn streamed() -> Self {
        Self {
            body: Body::Streamed,
            ..Self::ok()
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set a header from strings. Invalid names or values are logged and skipped.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => warn!(header = %name, "Ignoring invalid response header"),
        }
    }

    #[must_use]
    pub fn is_streamed(&self) -> bool {
        matches!(self.body, Body::Streamed)
    }
}

/// Per-request view handed to handlers and filters.
pub struct Context<'a> {
    exchange: &'a mut dyn Exchange,
    config: &'a DispatchConfig,
    codec: &'a dyn JsonCodec,
    request_id: RequestId,
    route: Option<RouteMatch>,
    path_params: OnceCell<Result<ParamVec, PatternError>>,
    query_params: OnceCell<ParamVec>,
    body: Option<Vec<u8>>,
    phase: Phase,
    started: Instant,
    truncated: bool,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        exchange: &'a mut dyn Exchange,
        config: &'a DispatchConfig,
        codec: &'a dyn JsonCodec,
    ) -> Self {
        let request_id = RequestId::from_headers(exchange.request_headers());
        Self {
            exchange,
            config,
            codec,
            request_id,
            route: None,
            path_params: OnceCell::new(),
            query_params: OnceCell::new(),
            body: None,
            phase: Phase::Routing,
            started: Instant::now(),
            truncated: false,
        }
    }

    // ---- request side -------------------------------------------------

    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        self.exchange.method()
    }

    /// Raw request path, not percent-decoded.
    #[must_use]
    pub fn path(&self) -> &str {
        self.exchange.path()
    }

    #[must_use]
    pub fn query_string(&self) -> Option<&str> {
        self.exchange.query()
    }

    #[must_use]
    pub fn version(&self) -> Version {
        self.exchange.version()
    }

    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.exchange.remote_addr()
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.exchange.request_headers()
    }

    /// First value of a request header, if it is valid text.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.exchange
            .request_headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
    }

    /// Route selected for this request; `None` while routing or on a 404.
    #[must_use]
    pub fn matched_route(&self) -> Option<&RouteMatch> {
        self.route.as_ref()
    }

    /// Template of the matched route, e.g. `/users/{id}`.
    #[must_use]
    pub fn route_pattern(&self) -> Option<&str> {
        self.route.as_ref().map(|r| r.pattern().raw())
    }

    /// All path parameters, decoded on first access.
    ///
    /// A segment that is not valid percent-encoded UTF-8 yields a 400.
    pub fn path_params(&self) -> Result<&ParamVec, DispatchError> {
        let decoded = self.path_params.get_or_init(|| match &self.route {
            Some(route) => route.path_params(self.exchange.path()),
            None => Ok(ParamVec::new()),
        });
        decoded
            .as_ref()
            .map_err(|e| HttpError::bad_request(e.to_string()).into())
    }

    /// One decoded path parameter by name.
    pub fn path_param(&self, name: &str) -> Result<&str, DispatchError> {
        self.path_params()?
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| {
                DispatchError::application(
                    "routing.param",
                    anyhow::anyhow!("route has no path parameter '{name}'"),
                )
            })
    }

    /// Query parameters in order of appearance, parsed on first access.
    #[must_use]
    pub fn query_params(&self) -> &ParamVec {
        self.query_params.get_or_init(|| {
            self.exchange
                .query()
                .map(|q| {
                    url::form_urlencoded::parse(q.as_bytes())
                        .map(|(k, v)| (Arc::<str>::from(k.as_ref()), v.into_owned()))
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    /// Query parameter by name. For repeated keys the last value wins.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_params()
            .iter()
            .rev()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Every value supplied for a repeated query key.
    #[must_use]
    pub fn query_param_all(&self, name: &str) -> Vec<&str> {
        self.query_params()
            .iter()
            .filter(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Request body, read from the transport once and cached.
    pub fn body_bytes(&mut self) -> Result<&[u8], DispatchError> {
        if self.body.is_none() {
            let mut buf = Vec::new();
            self.exchange.request_body().read_to_end(&mut buf)?;
            self.body = Some(buf);
        }
        Ok(self.body.as_deref().unwrap_or_default())
    }

    /// Request body as UTF-8 text; invalid UTF-8 is a 400.
    pub fn body_text(&mut self) -> Result<&str, DispatchError> {
        let bytes = self.body_bytes()?;
        std::str::from_utf8(bytes)
            .map_err(|_| HttpError::bad_request("Request body is not valid UTF-8").into())
    }

    /// Decode the body through the configured codec into `T`.
    ///
    /// Malformed JSON or a shape mismatch is a 400.
    pub fn body_json<T: DeserializeOwned>(&mut self) -> Result<T, DispatchError> {
        let codec = self.codec;
        let bytes = self.body_bytes()?;
        let value = codec
            .decode(bytes)
            .map_err(|e| HttpError::bad_request("Malformed JSON body").with_detail("cause", e.to_string()))?;
        serde_json::from_value(value).map_err(|e| {
            HttpError::bad_request("Unexpected JSON body")
                .with_detail("cause", e.to_string())
                .into()
        })
    }

    /// Whether the client's `Accept` header names JSON: `application/json`,
    /// `*/json` or a structured `+json` type such as `application/problem+json`.
    ///
    /// Wildcards like `*/*` do not count; plain text stays the default.
    #[must_use]
    pub fn accepts_json(&self) -> bool {
        self.exchange
            .request_headers()
            .get_all(ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(is_json_media_range)
    }

    // ---- attributes ---------------------------------------------------

    #[must_use]
    pub fn attribute<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.exchange.attributes().get::<T>()
    }

    /// Store a typed attribute, returning any previous value of that type.
    pub fn set_attribute<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.exchange.attributes_mut().insert(value)
    }

    // ---- response side ------------------------------------------------

    /// Status that will be (or was) sent.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.exchange.status()
    }

    /// Set the status directly on the exchange. Used by streaming handlers.
    pub fn set_status(&mut self, status: StatusCode) -> Result<(), DispatchError> {
        self.exchange.set_status(status).map_err(Into::into)
    }

    /// Set a pending response header. Fails once headers are on the wire.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), DispatchError> {
        if self.exchange.headers_sent() {
            return Err(ExchangeError::HeadersAlreadySent.into());
        }
        self.exchange.response_headers_mut().insert(name, value);
        Ok(())
    }

    #[must_use]
    pub fn response_headers(&self) -> &HeaderMap {
        self.exchange.response_headers()
    }

    #[must_use]
    pub fn headers_sent(&self) -> bool {
        self.exchange.headers_sent()
    }

    /// Streaming body writer with on-the-fly compression.
    ///
    /// Status and headers must be set before the first write; they are sent
    /// when the stream decides whether to compress. Call
    /// [`ResponseStream::finish`] when done and return [`Response::streamed`].
    pub fn output_stream(&mut self) -> Result<ResponseStream<'_>, DispatchError> {
        if self.exchange.headers_sent() {
            return Err(ExchangeError::HeadersAlreadySent.into());
        }
        self.stamp_request_id();
        let config = self.config;
        Ok(ResponseStream::new(&mut *self.exchange, &config.compression))
    }

    /// Serve `source` honouring the request's `Range` header.
    ///
    /// `total_len` is the size of the whole resource. Returns the response to
    /// hand back to the dispatcher (a 416 when the range cannot be satisfied).
    pub fn serve_range<R: Read + Seek>(
        &mut self,
        source: R,
        total_len: u64,
        content_type: &str,
    ) -> Result<Response, DispatchError> {
        range::serve(self, source, total_len, content_type)
    }

    /// Switch this exchange to a Server-Sent Events stream.
    pub fn sse(&mut self) -> Result<SseSession, DispatchError> {
        sse::open(self)
    }

    // ---- dispatcher internals -----------------------------------------

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Time since dispatch began.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        self.config
    }

    pub(crate) fn exchange_mut(&mut self) -> &mut dyn Exchange {
        &mut *self.exchange
    }

    pub(crate) fn set_route(&mut self, route: RouteMatch) {
        self.route = Some(route);
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub(crate) fn mark_truncated(&mut self) {
        self.truncated = true;
    }

    pub(crate) fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub(crate) fn close(&mut self) {
        if let Err(e) = self.exchange.close() {
            warn!(request_id = %self.request_id, error = %e, "Failed to close exchange");
        }
    }

    pub(crate) fn stamp_request_id(&mut self) {
        let value = self.request_id.to_header_value();
        self.exchange
            .response_headers_mut()
            .entry(REQUEST_ID_HEADER)
            .or_insert(value);
    }

    /// Write `response` to the exchange.
    ///
    /// Streamed responses only need their headers flushed if the handler never
    /// wrote anything. Buffered bodies are encoded, optionally compressed and
    /// sent with an exact `Content-Length`.
    pub(crate) fn commit(&mut self, response: Response) -> Result<(), DispatchError> {
        let Response {
            status,
            headers,
            body,
        } = response;

        let (bytes, default_type) = match body {
            Body::Streamed => {
                if !self.exchange.headers_sent() {
                    self.stamp_request_id();
                    self.exchange.send_headers()?;
                }
                return Ok(());
            }
            Body::Empty => (Vec::new(), None),
            Body::Bytes(b) => (b, Some("application/octet-stream")),
            Body::Text(t) => (t.into_bytes(), Some("text/plain; charset=utf-8")),
            Body::Json(v) => (self.codec.encode(&v)?, Some("application/json")),
        };

        if self.exchange.headers_sent() {
            return Err(ExchangeError::HeadersAlreadySent.into());
        }
        self.exchange.set_status(status)?;
        self.stamp_request_id();
        let pending = self.exchange.response_headers_mut();
        merge_headers(pending, headers);
        if let Some(content_type) = default_type {
            pending
                .entry(CONTENT_TYPE)
                .or_insert(HeaderValue::from_static(content_type));
        }

        if !body_permitted(status) {
            pending.remove(CONTENT_LENGTH);
            self.exchange.send_headers()?;
            return Ok(());
        }

        let send_body = *self.exchange.method() != Method::HEAD;
        compression::write_buffered(&mut *self.exchange, &self.config.compression, bytes, send_body)
    }
}

/// Merge `source` over `target`; names present in `source` replace all of
/// their values in `target`.
fn is_json_media_range(range: &str) -> bool {
    let essence = range.split(';').next().unwrap_or_default().trim();
    let Some((kind, subtype)) = essence.split_once('/') else {
        return false;
    };
    (kind.eq_ignore_ascii_case("application") || kind == "*")
        && (subtype.eq_ignore_ascii_case("json")
            || (subtype.len() > 5
                && subtype
                    .get(subtype.len() - 5..)
                    .is_some_and(|suffix| suffix.eq_ignore_ascii_case("+json"))))
}

fn merge_headers(target: &mut HeaderMap, source: HeaderMap) {
    let mut current: Option<HeaderName> = None;
    for (name, value) in source {
        match name {
            Some(name) => {
                target.insert(name.clone(), value);
                current = Some(name);
            }
            None => {
                if let Some(name) = &current {
                    target.append(name.clone(), value);
                }
            }
        }
    }
}

fn body_permitted(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

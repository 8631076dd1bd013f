//! In-memory exchange.
//!
//! Used by the test suite and by embedders that want to drive the dispatcher
//! without a socket. The response body lands in a [`SharedBuffer`] that can be
//! inspected after (or during) dispatch, and a write limit can be set to
//! simulate a client that disconnects mid-response.

use std::io::{self, Cursor, Read, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use http::header::{HeaderValue, IntoHeaderName};
use http::{Extensions, HeaderMap, Method, StatusCode, Version};

use super::{Exchange, ExchangeError};

#[derive(Debug, Default)]
struct BufferState {
    data: Vec<u8>,
    limit: Option<usize>,
    flushes: usize,
}

/// Cloneable handle to a response body buffer.
///
/// Every clone writes to and reads from the same bytes.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<BufferState>>,
}

impl SharedBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail every write once `limit` bytes have been accepted.
    pub fn set_limit(&self, limit: usize) {
        self.lock().limit = Some(limit);
    }

    /// Copy of everything written so far.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.lock().data.clone()
    }

    /// Contents as (lossy) UTF-8.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.lock().data).into_owned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().data.is_empty()
    }

    /// Number of `flush` calls observed.
    #[must_use]
    pub fn flush_count(&self) -> usize {
        self.lock().flushes
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        let accepted = match state.limit {
            Some(limit) => {
                let room = limit.saturating_sub(state.data.len());
                if room == 0 && !buf.is_empty() {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "peer closed the connection",
                    ));
                }
                room.min(buf.len())
            }
            None => buf.len(),
        };
        state.data.extend_from_slice(&buf[..accepted]);
        Ok(accepted)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock().flushes += 1;
        Ok(())
    }
}

/// Exchange backed entirely by memory.
#[derive(Debug)]
pub struct MemoryExchange {
    method: Method,
    path: String,
    query: Option<String>,
    version: Version,
    request_headers: HeaderMap,
    remote_addr: Option<SocketAddr>,
    body: Cursor<Vec<u8>>,
    status: StatusCode,
    response_headers: HeaderMap,
    /// Headers as they were at the moment they were sent.
    sent_headers: Option<HeaderMap>,
    output: SharedBuffer,
    attributes: Extensions,
    closed: bool,
}

impl MemoryExchange {
    /// Build a request for `target`, which may include a query string.
    #[must_use]
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (target.to_string(), None),
        };
        Self {
            method,
            path,
            query,
            version: Version::HTTP_11,
            request_headers: HeaderMap::new(),
            remote_addr: None,
            body: Cursor::new(Vec::new()),
            status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            sent_headers: None,
            output: SharedBuffer::new(),
            attributes: Extensions::new(),
            closed: false,
        }
    }

    #[must_use]
    pub fn get(target: &str) -> Self {
        Self::new(Method::GET, target)
    }

    #[must_use]
    pub fn post(target: &str, body: impl Into<Vec<u8>>) -> Self {
        Self::new(Method::POST, target).with_body(body)
    }

    /// Append a request header. Invalid values are dropped.
    #[must_use]
    pub fn with_header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: IntoHeaderName,
        V: TryInto<HeaderValue>,
    {
        if let Ok(value) = value.try_into() {
            self.request_headers.append(name, value);
        }
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Cursor::new(body.into());
        self
    }

    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Simulate a client that goes away after `limit` body bytes.
    #[must_use]
    pub fn fail_writes_after(self, limit: usize) -> Self {
        self.output.set_limit(limit);
        self
    }

    /// Handle to the response body, usable after the exchange is dropped.
    #[must_use]
    pub fn output_handle(&self) -> SharedBuffer {
        self.output.clone()
    }

    #[must_use]
    pub fn response_body(&self) -> Vec<u8> {
        self.output.contents()
    }

    #[must_use]
    pub fn response_text(&self) -> String {
        self.output.text()
    }

    /// Headers as committed to the "wire"; `None` until sent.
    #[must_use]
    pub fn sent_headers(&self) -> Option<&HeaderMap> {
        self.sent_headers.as_ref()
    }

    /// Convenience lookup on the committed headers.
    #[must_use]
    pub fn sent_header(&self, name: &str) -> Option<&str> {
        self.sent_headers
            .as_ref()
            .and_then(|h| h.get(name))
            .and_then(|v| v.to_str().ok())
    }
}

impl Exchange for MemoryExchange {
    fn method(&self) -> &Method {
        &self.method
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    fn version(&self) -> Version {
        self.version
    }

    fn request_headers(&self) -> &HeaderMap {
        &self.request_headers
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    fn request_body(&mut self) -> &mut dyn Read {
        &mut self.body
    }

    fn status(&self) -> StatusCode {
        self.status
    }

    fn set_status(&mut self, status: StatusCode) -> Result<(), ExchangeError> {
        if self.sent_headers.is_some() {
            return Err(ExchangeError::HeadersAlreadySent);
        }
        self.status = status;
        Ok(())
    }

    fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response_headers
    }

    fn headers_sent(&self) -> bool {
        self.sent_headers.is_some()
    }

    fn send_headers(&mut self) -> Result<(), ExchangeError> {
        if self.closed {
            return Err(ExchangeError::Closed);
        }
        if self.sent_headers.is_some() {
            return Err(ExchangeError::HeadersAlreadySent);
        }
        self.sent_headers = Some(self.response_headers.clone());
        Ok(())
    }

    fn output(&mut self) -> Result<&mut dyn Write, ExchangeError> {
        if self.closed {
            return Err(ExchangeError::Closed);
        }
        if self.sent_headers.is_none() {
            return Err(ExchangeError::HeadersNotSent);
        }
        Ok(&mut self.output)
    }

    fn detach_output(&mut self) -> Result<Box<dyn Write + Send>, ExchangeError> {
        if self.closed {
            return Err(ExchangeError::Closed);
        }
        if self.sent_headers.is_none() {
            return Err(ExchangeError::HeadersNotSent);
        }
        Ok(Box::new(self.output.clone()))
    }

    fn attributes(&self) -> &Extensions {
        &self.attributes
    }

    fn attributes_mut(&mut self) -> &mut Extensions {
        &mut self.attributes
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_split() {
        let ex = MemoryExchange::get("/a/b?x=1&y=2");
        assert_eq!(ex.path(), "/a/b");
        assert_eq!(ex.query(), Some("x=1&y=2"));
    }

    #[test]
    fn test_headers_sent_once() {
        let mut ex = MemoryExchange::get("/");
        assert!(matches!(ex.output(), Err(ExchangeError::HeadersNotSent)));
        ex.send_headers().unwrap();
        assert!(matches!(ex.send_headers(), Err(ExchangeError::HeadersAlreadySent)));
        assert!(matches!(
            ex.set_status(StatusCode::NOT_FOUND),
            Err(ExchangeError::HeadersAlreadySent)
        ));
    }

    #[test]
    fn test_write_limit_breaks_pipe() {
        let mut buf = SharedBuffer::new();
        buf.set_limit(4);
        assert_eq!(buf.write(b"abcdef").unwrap(), 4);
        assert_eq!(buf.write(b"g").unwrap_err().kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(buf.contents(), b"abcd");
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut ex = MemoryExchange::get("/");
        ex.close().unwrap();
        ex.close().unwrap();
        assert!(ex.is_closed());
    }
}

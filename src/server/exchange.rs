use std::io::{self, BufRead, Read, Write};
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError};

use http::header::{HeaderValue, CONNECTION};
use http::{Extensions, HeaderMap, Method, StatusCode, Version};
use may::sync::Mutex;

use super::request::{read_head, RequestError, RequestHead, RequestLimits};
use crate::exchange::{Exchange, ExchangeError};

/// Response writer shared between the exchange and any detached owner.
#[derive(Clone)]
struct SharedWriter(Arc<Mutex<Box<dyn Write + Send>>>);

impl SharedWriter {
    fn new(out: Box<dyn Write + Send>) -> Self {
        Self(Arc::new(Mutex::new(out)))
    }

    fn with<T>(&self, f: impl FnOnce(&mut dyn Write) -> io::Result<T>) -> io::Result<T> {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(guard.as_mut())
    }
}

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with(|w| w.write(buf))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.with(|w| w.write_all(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with(|w| w.flush())
    }
}

/// HTTP/1.1 exchange over a byte stream.
///
/// One request per connection: every response carries `Connection: close`.
/// Request bodies are bounded by `Content-Length`.
pub struct StreamExchange {
    head: RequestHead,
    remote_addr: Option<SocketAddr>,
    body: io::Take<Box<dyn BufRead + Send>>,
    status: StatusCode,
    response_headers: HeaderMap,
    headers_sent: bool,
    writer: SharedWriter,
    attributes: Extensions,
    closed: bool,
}

impl StreamExchange {
    /// Read a request head from `reader`; the body stays in the stream.
    pub fn read(
        mut reader: Box<dyn BufRead + Send>,
        writer: Box<dyn Write + Send>,
        remote_addr: Option<SocketAddr>,
        limits: &RequestLimits,
    ) -> Result<Self, RequestError> {
        let head = read_head(&mut reader, limits)?;
        let body = reader.take(head.content_length);
        Ok(Self {
            head,
            remote_addr,
            body,
            status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            headers_sent: false,
            writer: SharedWriter::new(writer),
            attributes: Extensions::new(),
            closed: false,
        })
    }

    /// The parsed request head.
    #[must_use]
    pub fn head(&self) -> &RequestHead {
        &self.head
    }
}

/// Write a minimal response directly, for requests that never parsed.
pub fn write_error_response(out: &mut dyn Write, status: StatusCode) -> io::Result<()> {
    let reason = status.canonical_reason().unwrap_or_default();
    write!(
        out,
        "HTTP/1.1 {} {reason}\r\ncontent-type: text/plain; charset=utf-8\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{reason}",
        status.as_u16(),
        reason.len()
    )?;
    out.flush()
}

impl Exchange for StreamExchange {
    fn method(&self) -> &Method {
        &self.head.method
    }

    fn path(&self) -> &str {
        &self.head.path
    }

    fn query(&self) -> Option<&str> {
        self.head.query.as_deref()
    }

    fn version(&self) -> Version {
        self.head.version
    }

    fn request_headers(&self) -> &HeaderMap {
        &self.head.headers
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
        if self.headers_sent {
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
        self.headers_sent
    }

    fn send_headers(&mut self) -> Result<(), ExchangeError> {
        if self.closed {
            return Err(ExchangeError::Closed);
        }
        if self.headers_sent {
            return Err(ExchangeError::HeadersAlreadySent);
        }
        self.headers_sent = true;
        self.response_headers
            .insert(CONNECTION, HeaderValue::from_static("close"));

        let mut head = Vec::with_capacity(256);
        let reason = self.status.canonical_reason().unwrap_or_default();
        write!(head, "HTTP/1.1 {} {reason}\r\n", self.status.as_u16())?;
        for (name, value) in &self.response_headers {
            head.extend_from_slice(name.as_str().as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(b"\r\n");
        self.writer.write_all(&head)?;
        Ok(())
    }

    fn output(&mut self) -> Result<&mut dyn Write, ExchangeError> {
        if self.closed {
            return Err(ExchangeError::Closed);
        }
        if !self.headers_sent {
            return Err(ExchangeError::HeadersNotSent);
        }
        Ok(&mut self.writer)
    }

    fn detach_output(&mut self) -> Result<Box<dyn Write + Send>, ExchangeError> {
        if self.closed {
            return Err(ExchangeError::Closed);
        }
        if !self.headers_sent {
            return Err(ExchangeError::HeadersNotSent);
        }
        Ok(Box::new(self.writer.clone()))
    }

    fn attributes(&self) -> &Extensions {
        &self.attributes
    }

    fn attributes_mut(&mut self) -> &mut Extensions {
        &mut self.attributes
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer.flush()
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

//! Response compression.
//!
//! The compress-or-not decision is made exactly once per response, from the
//! size of the first write (or of the whole body for buffered responses):
//!
//! 1. compression enabled and the size reaches `min_size`
//! 2. the response has no `Content-Encoding` yet
//! 3. the content type is compressible: anything outside `image/*`,
//!    `audio/*`, `video/*` and the excluded list, or explicitly allowed
//!    (`image/svg+xml` by default)
//! 4. the client offers gzip or deflate in `Accept-Encoding`
//!
//! `Vary: Accept-Encoding` is added whenever rules 2 and 3 hold, whatever the
//! outcome, so caches keep encoded and plain variants apart. When compressing,
//! `Content-Encoding` is set and any `Content-Length` is dropped (streamed)
//! or recomputed (buffered).

use std::io::{self, Write};
use std::mem;

use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use http::header::{
    HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, VARY,
};
use http::{HeaderMap, Method};
use tracing::{debug, warn};

use crate::config::CompressionConfig;
use crate::errors::DispatchError;
use crate::exchange::Exchange;

/// Supported content codings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Gzip,
    Deflate,
}

impl Encoding {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
        }
    }
}

/// Pick an encoding from an `Accept-Encoding` value.
///
/// Tokens are considered in the order the client listed them; matching is
/// case-insensitive and `;q=` weights are ignored. `*` selects gzip.
#[must_use]
pub fn negotiate(accept_encoding: &str) -> Option<Encoding> {
    accept_encoding.split(',').find_map(|token| {
        let coding = token.split(';').next().unwrap_or_default().trim();
        if coding.eq_ignore_ascii_case("gzip")
            || coding.eq_ignore_ascii_case("x-gzip")
            || coding == "*"
        {
            Some(Encoding::Gzip)
        } else if coding.eq_ignore_ascii_case("deflate") {
            Some(Encoding::Deflate)
        } else {
            None
        }
    })
}

/// Whether a response of `content_type` may be compressed.
///
/// A missing content type is treated as compressible.
#[must_use]
pub fn is_compressible(content_type: Option<&str>, config: &CompressionConfig) -> bool {
    let Some(content_type) = content_type else {
        return true;
    };
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if config.allowed_types.iter().any(|t| t.eq_ignore_ascii_case(&mime)) {
        return true;
    }
    if ["image/", "audio/", "video/"]
        .iter()
        .any(|family| mime.starts_with(family))
    {
        return false;
    }
    !config.excluded_types.iter().any(|t| t.eq_ignore_ascii_case(&mime))
}

/// Whether the response depends on `Accept-Encoding` at all.
#[must_use]
pub fn is_negotiable(response: &HeaderMap, config: &CompressionConfig) -> bool {
    config.enabled
        && !response.contains_key(CONTENT_ENCODING)
        && is_compressible(response.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()), config)
}

/// Decide whether to compress a body whose first chunk is `size` bytes.
#[must_use]
pub fn choose_encoding(
    request: &HeaderMap,
    response: &HeaderMap,
    config: &CompressionConfig,
    size: usize,
) -> Option<Encoding> {
    if size < config.min_size || !is_negotiable(response, config) {
        return None;
    }
    request
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(negotiate)
}

fn add_vary(headers: &mut HeaderMap) {
    let present = headers
        .get_all(VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("accept-encoding")));
    if !present {
        headers.append(VARY, HeaderValue::from_static("Accept-Encoding"));
    }
}

/// Apply the negotiation result to the pending headers.
fn apply_headers(headers: &mut HeaderMap, config: &CompressionConfig, encoding: Option<Encoding>) {
    if is_negotiable(headers, config) {
        add_vary(headers);
    }
    if let Some(encoding) = encoding {
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static(encoding.as_str()));
        headers.remove(CONTENT_LENGTH);
    }
}

/// Compress a complete body in memory.
pub fn compress(encoding: Encoding, level: u32, body: &[u8]) -> io::Result<Vec<u8>> {
    let level = Compression::new(level);
    match encoding {
        Encoding::Gzip => {
            let mut enc = GzEncoder::new(Vec::with_capacity(body.len() / 2), level);
            enc.write_all(body)?;
            enc.finish()
        }
        Encoding::Deflate => {
            let mut enc = DeflateEncoder::new(Vec::with_capacity(body.len() / 2), level);
            enc.write_all(body)?;
            enc.finish()
        }
    }
}

/// Send a fully buffered body with an exact `Content-Length`.
///
/// With `send_body == false` (HEAD) only the headers are written, carrying
/// the length the body would have had.
pub(crate) fn write_buffered(
    exchange: &mut dyn Exchange,
    config: &CompressionConfig,
    body: Vec<u8>,
    send_body: bool,
) -> Result<(), DispatchError> {
    let encoding = if send_body {
        choose_encoding(
            exchange.request_headers(),
            exchange.response_headers(),
            config,
            body.len(),
        )
    } else {
        None
    };

    if send_body {
        apply_headers(exchange.response_headers_mut(), config, encoding);
    }
    let payload = match encoding {
        Some(encoding) => {
            let compressed = compress(encoding, config.level, &body)?;
            debug!(
                encoding = encoding.as_str(),
                original_bytes = body.len(),
                compressed_bytes = compressed.len(),
                "Response body compressed"
            );
            compressed
        }
        None => body,
    };

    exchange
        .response_headers_mut()
        .insert(CONTENT_LENGTH, HeaderValue::from(payload.len()));
    exchange.send_headers()?;
    if send_body && !payload.is_empty() {
        let out = exchange.output()?;
        out.write_all(&payload)?;
        out.flush()?;
    }
    Ok(())
}

enum Sink<'a> {
    /// Nothing written yet; headers still pending.
    Pending(&'a mut dyn Exchange),
    Plain(&'a mut dyn Write),
    Gzip(GzEncoder<&'a mut dyn Write>),
    Deflate(DeflateEncoder<&'a mut dyn Write>),
    /// HEAD request: headers went out, body bytes are dropped.
    Discard,
    Closed,
}

/// Streaming body writer that compresses when worthwhile.
///
/// The first non-empty write commits status and headers. A write failure
/// closes the stream for good; later writes fail with `BrokenPipe`.
/// For a HEAD request the headers are the ones a GET would get, and the
/// body is swallowed.
pub struct ResponseStream<'a> {
    sink: Sink<'a>,
    config: &'a CompressionConfig,
    encoding: Option<Encoding>,
    failed: bool,
    bytes_written: u64,
}

impl<'a> ResponseStream<'a> {
    pub(crate) fn new(exchange: &'a mut dyn Exchange, config: &'a CompressionConfig) -> Self {
        Self {
            sink: Sink::Pending(exchange),
            config,
            encoding: None,
            failed: false,
            bytes_written: 0,
        }
    }

    /// Encoding picked at the first write; `None` before that or when uncompressed.
    #[must_use]
    pub fn encoding(&self) -> Option<Encoding> {
        self.encoding
    }

    /// `true` after a write failure or [`finish`](Self::finish).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self.sink, Sink::Closed)
    }

    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Uncompressed bytes accepted so far.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn start(&mut self, first_write: usize) -> io::Result<()> {
        let Sink::Pending(exchange) = mem::replace(&mut self.sink, Sink::Closed) else {
            return Ok(());
        };
        let encoding = choose_encoding(
            exchange.request_headers(),
            exchange.response_headers(),
            self.config,
            first_write,
        );
        apply_headers(exchange.response_headers_mut(), self.config, encoding);
        self.encoding = encoding;

        if let Err(e) = exchange.send_headers() {
            self.failed = true;
            return Err(io::Error::other(e));
        }
        if *exchange.method() == Method::HEAD {
            self.sink = Sink::Discard;
            return Ok(());
        }
        let out = match exchange.output() {
            Ok(out) => out,
            Err(e) => {
                self.failed = true;
                return Err(io::Error::other(e));
            }
        };
        let level = Compression::new(self.config.level);
        self.sink = match encoding {
            Some(Encoding::Gzip) => Sink::Gzip(GzEncoder::new(out, level)),
            Some(Encoding::Deflate) => Sink::Deflate(DeflateEncoder::new(out, level)),
            None => Sink::Plain(out),
        };
        Ok(())
    }

    fn fail(&mut self, error: io::Error) -> io::Error {
        if !self.failed {
            // S1: client went away mid-stream
            warn!(error = %error, bytes_written = self.bytes_written, "Response stream write failed");
        }
        self.failed = true;
        self.sink = Sink::Closed;
        error
    }

    /// Flush trailing compressed data and the transport.
    ///
    /// If nothing was ever written, headers are sent with an empty body.
    pub fn finish(mut self) -> io::Result<()> {
        self.finish_inner()
    }

    fn finish_inner(&mut self) -> io::Result<()> {
        let result = match mem::replace(&mut self.sink, Sink::Closed) {
            Sink::Pending(exchange) => {
                if exchange.headers_sent() {
                    Ok(())
                } else {
                    exchange
                        .response_headers_mut()
                        .insert(CONTENT_LENGTH, HeaderValue::from(0u64));
                    exchange.send_headers().map_err(io::Error::other)
                }
            }
            Sink::Discard => Ok(()),
            Sink::Plain(out) => out.flush(),
            Sink::Gzip(enc) => enc.finish().and_then(|out| out.flush()),
            Sink::Deflate(enc) => enc.finish().and_then(|out| out.flush()),
            Sink::Closed => {
                if self.failed {
                    Err(closed_error())
                } else {
                    Ok(())
                }
            }
        };
        result.map_err(|e| self.fail(e))
    }
}

impl Write for ResponseStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if matches!(self.sink, Sink::Pending(_)) {
            self.start(buf.len())?;
        }
        let result = match &mut self.sink {
            Sink::Plain(out) => out.write(buf),
            Sink::Gzip(enc) => enc.write(buf),
            Sink::Deflate(enc) => enc.write(buf),
            Sink::Discard => Ok(buf.len()),
            Sink::Pending(_) | Sink::Closed => return Err(closed_error()),
        };
        match result {
            Ok(n) => {
                self.bytes_written += n as u64;
                Ok(n)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let result = match &mut self.sink {
            Sink::Pending(_) | Sink::Discard => return Ok(()),
            Sink::Plain(out) => out.flush(),
            Sink::Gzip(enc) => enc.flush(),
            Sink::Deflate(enc) => enc.flush(),
            Sink::Closed => return Err(closed_error()),
        };
        result.map_err(|e| self.fail(e))
    }
}

impl Drop for ResponseStream<'_> {
    fn drop(&mut self) {
        if !matches!(self.sink, Sink::Closed) {
            if let Err(e) = self.finish_inner() {
                debug!(error = %e, "Response stream finished on drop with error");
            }
        }
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "response stream is closed")
}

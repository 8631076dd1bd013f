//! HTTP/1.1 request-head parsing for [`StreamExchange`](super::StreamExchange).

use std::io::{self, BufRead, Read};

use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, Method, Version};
use thiserror::Error;

/// Size limits applied while reading a request.
#[derive(Debug, Clone)]
pub struct RequestLimits {
    /// Longest accepted request line or header line, in bytes.
    pub max_line: usize,
    pub max_headers: usize,
    /// Largest accepted `Content-Length`.
    pub max_body: u64,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_line: 8 * 1024,
            max_headers: 64,
            max_body: 16 * 1024 * 1024,
        }
    }
}

/// Why a request head could not be read.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The peer closed the connection before sending anything.
    #[error("connection closed before a request was received")]
    Eof,
    #[error("request line or header exceeds {0} bytes")]
    LineTooLong(usize),
    #[error("more than {0} request headers")]
    TooManyHeaders(usize),
    #[error("request body of {0} bytes exceeds the limit")]
    BodyTooLarge(u64),
    #[error("unsupported transfer encoding")]
    UnsupportedEncoding,
    #[error("malformed request: {0}")]
    Malformed(&'static str),
    #[error("I/O error reading request: {0}")]
    Io(#[from] io::Error),
}

/// Parsed request line and headers.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// Origin-form path, never empty.
    pub path: String,
    pub query: Option<String>,
    pub version: Version,
    pub headers: HeaderMap,
    /// Declared body length; 0 when absent.
    pub content_length: u64,
}

/// Read one request head from `reader`.
pub fn read_head<R: BufRead + ?Sized>(
    reader: &mut R,
    limits: &RequestLimits,
) -> Result<RequestHead, RequestError> {
    // tolerate stray blank lines before the request line
    let line = loop {
        match read_line(reader, limits.max_line)? {
            None => return Err(RequestError::Eof),
            Some(line) if line.is_empty() => continue,
            Some(line) => break line,
        }
    };

    let mut parts = line.split(' ').filter(|p| !p.is_empty());
    let method = parts
        .next()
        .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
        .ok_or(RequestError::Malformed("invalid method"))?;
    let target = parts.next().ok_or(RequestError::Malformed("missing target"))?;
    let version = match parts.next() {
        Some("HTTP/1.1") => Version::HTTP_11,
        Some("HTTP/1.0") => Version::HTTP_10,
        _ => return Err(RequestError::Malformed("unsupported protocol version")),
    };
    if parts.next().is_some() {
        return Err(RequestError::Malformed("trailing data in request line"));
    }
    let (path, query) = split_target(target)?;

    let mut headers = HeaderMap::new();
    loop {
        let line = read_line(reader, limits.max_line)?
            .ok_or(RequestError::Malformed("connection closed inside headers"))?;
        if line.is_empty() {
            break;
        }
        if headers.len() >= limits.max_headers {
            return Err(RequestError::TooManyHeaders(limits.max_headers));
        }
        let (name, value) = line
            .split_once(':')
            .ok_or(RequestError::Malformed("header without colon"))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| RequestError::Malformed("invalid header name"))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| RequestError::Malformed("invalid header value"))?;
        headers.append(name, value);
    }

    if headers.contains_key(TRANSFER_ENCODING) {
        return Err(RequestError::UnsupportedEncoding);
    }
    let content_length = match headers.get(CONTENT_LENGTH) {
        None => 0,
        Some(v) => v
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .ok_or(RequestError::Malformed("invalid content-length"))?,
    };
    if content_length > limits.max_body {
        return Err(RequestError::BodyTooLarge(content_length));
    }

    Ok(RequestHead {
        method,
        path,
        query,
        version,
        headers,
        content_length,
    })
}

/// Split a request target into path and query.
///
/// Absolute-form targets (`http://host/p?q`) are reduced to their origin
/// form. `*` is kept as-is for `OPTIONS *`.
pub fn split_target(target: &str) -> Result<(String, Option<String>), RequestError> {
    let origin = if target.starts_with('/') || target == "*" {
        target
    } else if let Some((_, rest)) = target.split_once("://") {
        match rest.find(['/', '?']) {
            Some(i) if rest[i..].starts_with('/') => &rest[i..],
            Some(i) => return Ok(("/".to_string(), Some(rest[i + 1..].to_string()))),
            None => "/",
        }
    } else {
        return Err(RequestError::Malformed("invalid request target"));
    };
    let (path, query) = match origin.split_once('?') {
        Some((p, q)) => (p, Some(q.to_string())),
        None => (origin, None),
    };
    let path = path.split('#').next().unwrap_or_default();
    Ok((path.to_string(), query))
}

/// Read a CRLF (or bare LF) terminated line without the terminator.
///
/// `Ok(None)` at a clean end of stream.
fn read_line<R: BufRead + ?Sized>(reader: &mut R, max: usize) -> Result<Option<String>, RequestError> {
    let mut buf = Vec::with_capacity(128);
    let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(2);
    let n = Read::take(&mut *reader, limit).read_until(b'\n', &mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        if buf.len() as u64 >= limit {
            return Err(RequestError::LineTooLong(max));
        }
        return Err(RequestError::Malformed("unterminated line"));
    }
    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    if buf.len() > max {
        return Err(RequestError::LineTooLong(max));
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| RequestError::Malformed("non UTF-8 request head"))
}

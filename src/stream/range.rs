//! Byte-range serving.
//!
//! Only single ranges are honoured. A multi-range request is answered with
//! its first range as one contiguous `206`, never as `multipart/byteranges`.
//! All offsets are `u64` so sources beyond 4 GiB work on every platform.

use std::io::{self, Read, Seek, SeekFrom, Write};

use http::header::{HeaderValue, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use http::{Method, StatusCode};
use tracing::{debug, warn};

use crate::context::{Context, Response};
use crate::errors::DispatchError;

/// Inclusive byte range within a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    #[must_use]
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    #[must_use]
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// What to serve for a given `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// No usable range: serve everything with `200`.
    Full,
    Partial(ByteRange),
    /// Well-formed but outside the source: `416`.
    Unsatisfiable,
}

/// Interpret a `Range` header against a source of `total` bytes.
///
/// Unknown units and malformed specs are ignored (full response), per HTTP
/// semantics. An end past the source is clamped to `total - 1`.
#[must_use]
pub fn parse_range(header: Option<&str>, total: u64) -> RangeRequest {
    let Some(spec) = header.and_then(|h| h.trim().strip_prefix("bytes=")) else {
        return RangeRequest::Full;
    };
    let first = spec.split(',').next().unwrap_or_default().trim();
    let Some((start, end)) = first.split_once('-') else {
        return RangeRequest::Full;
    };
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        // suffix form: last N bytes
        let Ok(suffix) = end.parse::<u64>() else {
            return RangeRequest::Full;
        };
        if suffix == 0 || total == 0 {
            return RangeRequest::Unsatisfiable;
        }
        return RangeRequest::Partial(ByteRange {
            start: total.saturating_sub(suffix),
            end: total - 1,
        });
    }

    let Ok(start) = start.parse::<u64>() else {
        return RangeRequest::Full;
    };
    let end = if end.is_empty() {
        None
    } else {
        match end.parse::<u64>() {
            Ok(end) => Some(end),
            Err(_) => return RangeRequest::Full,
        }
    };
    if matches!(end, Some(end) if end < start) {
        return RangeRequest::Full;
    }
    if start >= total {
        return RangeRequest::Unsatisfiable;
    }
    let last = total - 1;
    RangeRequest::Partial(ByteRange {
        start,
        end: end.map_or(last, |e| e.min(last)),
    })
}

/// How a range copy ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeOutcome {
    pub bytes_written: u64,
    /// `false` when the client went away or the source ran short.
    pub completed: bool,
}

/// Copy `len` bytes from the current position of `source` in `chunk_size` pieces.
///
/// Read errors propagate. Write errors end the copy and are reported through
/// [`RangeOutcome::completed`].
pub fn copy_range<R: Read + ?Sized, W: Write + ?Sized>(
    source: &mut R,
    out: &mut W,
    len: u64,
    chunk_size: usize,
) -> io::Result<RangeOutcome> {
    let chunk_size = chunk_size.max(1);
    let mut buf = vec![0u8; usize::try_from(len).map_or(chunk_size, |l| l.min(chunk_size))];
    let mut remaining = len;
    let mut written = 0u64;

    while remaining > 0 {
        let want = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let n = source.read(&mut buf[..want])?;
        if n == 0 {
            warn!(expected = len, written, "Range source ended early");
            return Ok(RangeOutcome {
                bytes_written: written,
                completed: false,
            });
        }
        if let Err(e) = out.write_all(&buf[..n]) {
            // S2: client went away during range copy
            warn!(error = %e, written, expected = len, "Range write failed, closing");
            return Ok(RangeOutcome {
                bytes_written: written,
                completed: false,
            });
        }
        written += n as u64;
        remaining -= n as u64;
    }
    if let Err(e) = out.flush() {
        warn!(error = %e, written, "Range flush failed, closing");
        return Ok(RangeOutcome {
            bytes_written: written,
            completed: false,
        });
    }
    Ok(RangeOutcome {
        bytes_written: written,
        completed: true,
    })
}

pub(crate) fn serve<R: Read + Seek>(
    ctx: &mut Context<'_>,
    mut source: R,
    total: u64,
    content_type: &str,
) -> Result<Response, DispatchError> {
    let requested = parse_range(ctx.header(RANGE.as_str()), total);
    let content_type = HeaderValue::from_str(content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let head_only = *ctx.method() == Method::HEAD;
    let chunk_size = ctx.config().range.chunk_size;

    let (status, range) = match requested {
        RangeRequest::Unsatisfiable => {
            debug!(total, "Unsatisfiable range requested");
            return Ok(Response::new(StatusCode::RANGE_NOT_SATISFIABLE)
                .with_header(ACCEPT_RANGES, HeaderValue::from_static("bytes"))
                .with_header(CONTENT_RANGE, header_value(&format!("bytes */{total}"))));
        }
        RangeRequest::Full => (StatusCode::OK, None),
        RangeRequest::Partial(range) => (StatusCode::PARTIAL_CONTENT, Some(range)),
    };

    // seek before anything is sent so source errors still map to a response
    let (start, len) = match range {
        Some(r) => (r.start, r.len()),
        None => (0, total),
    };
    source.seek(SeekFrom::Start(start))?;

    ctx.set_status(status)?;
    ctx.set_header(ACCEPT_RANGES, HeaderValue::from_static("bytes"))?;
    ctx.set_header(CONTENT_TYPE, content_type)?;
    ctx.set_header(CONTENT_LENGTH, HeaderValue::from(len))?;
    if let Some(r) = range {
        ctx.set_header(CONTENT_RANGE, header_value(&r.content_range(total)))?;
    }
    ctx.stamp_request_id();

    let exchange = ctx.exchange_mut();
    exchange.send_headers()?;
    if head_only || len == 0 {
        return Ok(Response::streamed());
    }

    let outcome = match exchange.output() {
        Ok(out) => copy_range(&mut source, out, len, chunk_size)?,
        Err(e) => {
            warn!(error = %e, "Range output unavailable");
            RangeOutcome {
                bytes_written: 0,
                completed: false,
            }
        }
    };
    if !outcome.completed {
        ctx.mark_truncated();
    }
    debug!(
        status = status.as_u16(),
        bytes_written = outcome.bytes_written,
        completed = outcome.completed,
        "Range served"
    );
    Ok(Response::streamed())
}

fn header_value(text: &str) -> HeaderValue {
    HeaderValue::from_str(text).unwrap_or_else(|_| HeaderValue::from_static(""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn partial(start: u64, end: u64) -> RangeRequest {
        RangeRequest::Partial(ByteRange { start, end })
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(parse_range(None, 100), RangeRequest::Full);
        assert_eq!(parse_range(Some("bytes=0-9"), 100), partial(0, 9));
        assert_eq!(parse_range(Some("bytes=10-"), 100), partial(10, 99));
        assert_eq!(parse_range(Some("bytes=-10"), 100), partial(90, 99));
        assert_eq!(parse_range(Some("bytes=-500"), 100), partial(0, 99));
        assert_eq!(parse_range(Some("bytes=0-4, 10-20"), 100), partial(0, 4));
    }

    #[test]
    fn test_end_is_clamped() {
        assert_eq!(parse_range(Some("bytes=50-1000"), 100), partial(50, 99));
    }

    #[test]
    fn test_unsatisfiable_and_ignored() {
        assert_eq!(parse_range(Some("bytes=100-"), 100), RangeRequest::Unsatisfiable);
        assert_eq!(parse_range(Some("bytes=-0"), 100), RangeRequest::Unsatisfiable);
        assert_eq!(parse_range(Some("bytes=0-"), 0), RangeRequest::Unsatisfiable);
        assert_eq!(parse_range(Some("items=0-5"), 100), RangeRequest::Full);
        assert_eq!(parse_range(Some("bytes=9-3"), 100), RangeRequest::Full);
        assert_eq!(parse_range(Some("bytes=x-3"), 100), RangeRequest::Full);
    }

    #[test]
    fn test_offsets_beyond_32_bits() {
        let total = 6 * 1024 * 1024 * 1024u64;
        let r = parse_range(Some("bytes=4294967296-"), total);
        assert_eq!(r, partial(4_294_967_296, total - 1));
        if let RangeRequest::Partial(r) = r {
            assert_eq!(r.len(), total - 4_294_967_296);
        }
    }

    #[test]
    fn test_copy_in_chunks() {
        let mut src = Cursor::new((0u8..=255).collect::<Vec<_>>());
        src.seek(SeekFrom::Start(10)).unwrap();
        let mut out = Vec::new();
        let outcome = copy_range(&mut src, &mut out, 20, 7).unwrap();
        assert!(outcome.completed);
        assert_eq!(outcome.bytes_written, 20);
        assert_eq!(out, (10u8..30).collect::<Vec<_>>());
    }

    #[test]
    fn test_short_source_is_incomplete() {
        let mut src = Cursor::new(vec![1u8; 5]);
        let mut out = Vec::new();
        let outcome = copy_range(&mut src, &mut out, 10, 4).unwrap();
        assert!(!outcome.completed);
        assert_eq!(outcome.bytes_written, 5);
    }
}

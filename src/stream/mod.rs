//! # Output Streaming Helpers
//!
//! Body writers layered over an [`Exchange`](crate::exchange::Exchange)'s
//! output stream.
//!
//! - [`compression`]: negotiates gzip/deflate from `Accept-Encoding` and
//!   compresses buffered or streamed bodies when worthwhile
//! - [`range`]: serves seekable sources honouring single `Range: bytes=`
//!   requests
//!
//! Both report I/O failures on the client connection as a sticky closed
//! state: once a write fails, the stream stays closed and the request is
//! logged as truncated rather than remapped into a new response.

pub mod compression;
pub mod range;

pub use compression::{negotiate, Encoding, ResponseStream};
pub use range::{parse_range, ByteRange, RangeOutcome, RangeRequest};

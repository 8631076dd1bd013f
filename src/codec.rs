//! Pluggable JSON codec.
//!
//! The dispatcher never calls `serde_json` directly for request or response
//! bodies; it goes through a [`JsonCodec`] so applications can swap in a
//! codec with different formatting or number handling. Typed access is
//! layered on top via `serde_json::Value` conversion in
//! [`Context::body_json`](crate::context::Context::body_json).

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode JSON: {0}")]
    Encode(String),
    #[error("failed to decode JSON: {0}")]
    Decode(String),
}

/// Encodes and decodes JSON bodies.
pub trait JsonCodec: Send + Sync {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError>;
}

/// Default codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerdeJsonCodec {
    /// Indent output. Handy in development, wasteful in production.
    pub pretty: bool,
}

impl SerdeJsonCodec {
    #[must_use]
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl JsonCodec for SerdeJsonCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        let out = if self.pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        };
        out.map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

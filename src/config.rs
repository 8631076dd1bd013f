//! # Dispatch Configuration
//!
//! Static configuration for the routing and dispatch core, loaded once at
//! start-up (typically from `config/config.yaml`) and shared read-only with
//! every request.
//!
//! ```yaml
//! router:
//!   strict_trailing_slash: false
//!   bucket_cap: 5
//! compression:
//!   enabled: true
//!   min_size: 1500
//!   level: 6
//! range:
//!   chunk_size: 131072
//! sse:
//!   retry_ms: 3000
//! ```
//!
//! Every field is optional; omitted fields take the defaults shown above.

use std::fs;
use std::path::Path;

use anyhow::{Context as _, Result};
use serde::Deserialize;
use thiserror::Error;

use crate::router::DEFAULT_BUCKET_CAP;

/// A configuration value outside its allowed range.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("compression.level must be between 0 and 9, got {0}")]
    CompressionLevel(u32),
    #[error("range.chunk_size must be greater than zero")]
    ChunkSize,
    #[error("router.bucket_cap must be greater than zero")]
    BucketCap,
}

/// Router behaviour.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RouterConfig {
    /// When set, `/a/` and `/a` are different paths.
    pub strict_trailing_slash: bool,
    /// Paths with at least this many segments share the last index bucket.
    pub bucket_cap: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strict_trailing_slash: false,
            bucket_cap: DEFAULT_BUCKET_CAP,
        }
    }
}

/// Conditional response compression.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,
    /// Bodies whose first write is smaller than this pass through uncompressed.
    pub min_size: usize,
    /// flate2 compression level, 0-9.
    pub level: u32,
    /// Content types never compressed, in addition to `image/*`, `audio/*`, `video/*`.
    pub excluded_types: Vec<String>,
    /// Content types compressed even though a family rule would exclude them.
    pub allowed_types: Vec<String>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // one network packet
            min_size: 1500,
            level: 6,
            excluded_types: [
                "application/compress",
                "application/zip",
                "application/gzip",
                "application/x-gzip",
                "application/bzip2",
                "application/brotli",
                "application/x-xz",
                "application/x-rar-compressed",
                "application/x-7z-compressed",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            allowed_types: vec!["image/svg+xml".to_string()],
        }
    }
}

/// Byte-range serving.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RangeConfig {
    /// Bytes copied per write while serving a range.
    pub chunk_size: usize,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            chunk_size: 128 * 1024,
        }
    }
}

/// Server-Sent Events.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SseConfig {
    /// Reconnection hint sent as a `retry:` line when a session opens.
    pub retry_ms: Option<u64>,
}

/// Top-level configuration for the dispatch core.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DispatchConfig {
    pub router: RouterConfig,
    pub compression: CompressionConfig,
    pub range: RangeConfig,
    pub sse: SseConfig,
}

impl DispatchConfig {
    /// Parse configuration from a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: DispatchConfig =
            serde_yaml::from_str(yaml).context("Failed to parse dispatch configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&text)
    }

    /// Check value ranges serde cannot express.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.compression.level > 9 {
            return Err(ConfigError::CompressionLevel(self.compression.level));
        }
        if self.range.chunk_size == 0 {
            return Err(ConfigError::ChunkSize);
        }
        if self.router.bucket_cap == 0 {
            return Err(ConfigError::BucketCap);
        }
        Ok(())
    }
}

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{AenkerError, AenkerResult};

/// Plaintext bytes per chunk, including the trailing marker byte.
/// A sealed chunk of this size is exactly 2000 bytes on the wire.
pub const DEFAULT_CHUNK_SIZE: usize = 1984;

/// One data byte plus the marker byte.
pub const MIN_CHUNK_SIZE: usize = 2;

/// Upper bound on the chunk buffer (1 GiB).
pub const MAX_CHUNK_SIZE: usize = 1 << 30;

/// Check a chunk size against the stream limits and return it in the
/// 4-byte form that is bound into every chunk's associated data.
pub fn validate_chunk_size(chunk_size: usize) -> AenkerResult<u32> {
    if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
        return Err(AenkerError::Config(format!(
            "chunk size {chunk_size} out of range ({MIN_CHUNK_SIZE}..={MAX_CHUNK_SIZE})"
        )));
    }
    u32::try_from(chunk_size)
        .map_err(|_| AenkerError::Config(format!("chunk size {chunk_size} does not fit in u32")))
}

/// Top-level configuration (loaded from aenker.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AenkerConfig {
    pub stream: StreamConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Plaintext chunk size in bytes (default: 1984). Must match between
    /// encryption and decryption.
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: warn)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            format: "text".into(),
        }
    }
}

impl AenkerConfig {
    /// Parse a TOML document and validate the stream section.
    pub fn from_toml(content: &str) -> AenkerResult<Self> {
        let config: AenkerConfig =
            toml::from_str(content).map_err(|e| AenkerError::Config(format!("parsing config: {e}")))?;
        validate_chunk_size(config.stream.chunk_size)?;
        Ok(config)
    }

    /// Load configuration from `path`. Returns `None` when the file does
    /// not exist, so the caller can decide how loudly to fall back.
    pub fn load(path: &Path) -> AenkerResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content).map(Some)
    }

    pub fn to_toml(&self) -> AenkerResult<String> {
        toml::to_string_pretty(self).map_err(|e| AenkerError::Config(format!("serializing config: {e}")))
    }
}

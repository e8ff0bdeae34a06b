//! Client configuration
//!
//! Loaded from defaults, environment variables or a TOML file.
//!
//! Config file format:
//! ```toml
//! max_piece_size = 104857600
//! prefetch_depth = 4
//! upload_buffer = 16
//! flush_delay_ms = 1000
//! ```

use ddc_core::error::{DdcError, Result};
use ddc_core::{DEFAULT_PIECE_SIZE, MAX_PIECE_SIZE, MIN_PIECE_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Content engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Piece size the chunker splits content at
    pub max_piece_size: usize,

    /// Pieces fetched ahead of the one being yielded on read
    pub prefetch_depth: usize,

    /// Buffers queued per in-flight piece upload
    pub upload_buffer: usize,

    /// Debounce delay before usage is settled
    pub flush_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_piece_size: DEFAULT_PIECE_SIZE,
            prefetch_depth: 4,
            upload_buffer: 16,
            flush_delay_ms: 1000,
        }
    }
}

impl ClientConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            max_piece_size: parse_var(&lookup, "DDC_MAX_PIECE_SIZE", defaults.max_piece_size)?,
            prefetch_depth: parse_var(&lookup, "DDC_PREFETCH_DEPTH", defaults.prefetch_depth)?,
            upload_buffer: parse_var(&lookup, "DDC_UPLOAD_BUFFER", defaults.upload_buffer)?,
            flush_delay_ms: parse_var(&lookup, "DDC_FLUSH_DELAY_MS", defaults.flush_delay_ms)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| DdcError::Configuration(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Check values against network limits
    pub fn validate(&self) -> Result<()> {
        if !(MIN_PIECE_SIZE..=MAX_PIECE_SIZE).contains(&self.max_piece_size) {
            return Err(DdcError::InvalidPieceSize {
                size: self.max_piece_size,
                min: MIN_PIECE_SIZE,
                max: MAX_PIECE_SIZE,
            });
        }
        if self.prefetch_depth == 0 {
            return Err(DdcError::Configuration(
                "prefetch_depth must be at least 1".to_string(),
            ));
        }
        if self.upload_buffer == 0 {
            return Err(DdcError::Configuration(
                "upload_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Get flush delay as Duration
    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| DdcError::Configuration(format!("invalid value for {}: '{}'", key, raw))),
        None => Ok(default),
    }
}

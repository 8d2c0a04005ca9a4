//! Runtime configuration for kv-cache-bridge.
//!
//! Configuration can be loaded from a JSON file or constructed
//! programmatically. All compression and streaming knobs live here.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::compressor::CompressorSettings;

/// Rejected configuration values. All checks run before any work starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("attention threshold must be in (0, 1], got {0}")]
    ThresholdOutOfRange(f64),

    #[error("chunk size must be at least 1 token")]
    ZeroChunkSize,
}

/// Command-line arguments for the benchmark binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "kv-cache-bridge",
    about = "Cross-model KV-cache transfer benchmark driver"
)]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Model identifier used for adapter lookup.
    #[arg(long, default_value = "llama-3-8b")]
    pub model: String,

    /// Synthetic sequence length in tokens.
    #[arg(long, default_value_t = 2048)]
    pub tokens: usize,

    /// Embedding dimension of the synthetic keys/values.
    #[arg(long, default_value_t = 512)]
    pub dimension: usize,

    /// Number of compress+transform iterations.
    #[arg(long, default_value_t = 10)]
    pub iterations: usize,

    /// Print the summary as JSON instead of log lines.
    #[arg(long)]
    pub json: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Compression settings.
    pub compression: CompressionConfig,

    /// Streaming pipeline settings.
    pub streaming: StreamingConfig,
}

/// Compression tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Attention-mass threshold override, in (0, 1]. When absent, the
    /// model adapter's recommended threshold applies.
    pub attention_threshold: Option<f64>,

    /// Minimum number of tokens to retain.
    pub min_tokens: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            attention_threshold: None,
            min_tokens: 10,
        }
    }
}

impl CompressionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(threshold) = self.attention_threshold {
            if !(threshold > 0.0 && threshold <= 1.0) {
                return Err(ConfigError::ThresholdOutOfRange(threshold));
            }
        }
        Ok(())
    }

    /// Compressor settings with the threshold resolved against an adapter
    /// recommendation. The caller override always wins.
    pub fn resolve(&self, recommended_threshold: f64) -> CompressorSettings {
        CompressorSettings {
            attention_threshold: self.attention_threshold.unwrap_or(recommended_threshold),
            min_tokens: self.min_tokens,
        }
    }
}

/// Streaming pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Buffered token count that triggers chunk compression.
    pub chunk_size: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self { chunk_size: 256 }
    }
}

impl StreamingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            serde_json::from_str(&data)?
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.compression.validate()?;
        self.streaming.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.streaming.chunk_size, 256);
        assert_eq!(cfg.compression.min_tokens, 10);
    }

    #[test]
    fn test_threshold_override_must_be_in_range() {
        let mut cfg = Config::default();
        cfg.compression.attention_threshold = Some(1.2);
        assert_eq!(cfg.validate(), Err(ConfigError::ThresholdOutOfRange(1.2)));

        cfg.compression.attention_threshold = Some(0.0);
        assert!(cfg.validate().is_err());

        cfg.compression.attention_threshold = Some(1.0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let mut cfg = Config::default();
        cfg.streaming.chunk_size = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroChunkSize));
    }

    #[test]
    fn test_resolve_prefers_override() {
        let mut compression = CompressionConfig::default();
        assert_eq!(compression.resolve(0.85).attention_threshold, 0.85);

        compression.attention_threshold = Some(0.95);
        assert_eq!(compression.resolve(0.85).attention_threshold, 0.95);
    }
}

//! Transfer engine façade.
//!
//! The path an inference process calls: resolve the compression threshold
//! against the source model's adapter, compress, project into the target
//! model's latent space, validate, and hand back the projected cache with
//! its quality report and metrics.

use std::time::Instant;

use thiserror::Error;
use tracing::info;

use crate::cache::compressor::{AttentionCompressor, CompressionError};
use crate::cache::kv::{KvCache, TransformedKvCache};
use crate::config::{Config, ConfigError};
use crate::metrics::{self, CompressionMetrics, QualityReport};
use crate::registry;
use crate::transform::projector;
use crate::transform::wmatrix::{ProjectionError, Transformation};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Compression(#[from] CompressionError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

/// Everything a transfer call produces.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub transformed: TransformedKvCache,
    pub report: QualityReport,
    pub metrics: CompressionMetrics,
}

/// Compress-then-project coordinator.
pub struct TransferEngine {
    config: Config,
}

impl TransferEngine {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the full transfer: compress `cache`, project it through
    /// `transformation`, validate the result against the source model's
    /// adapter. The configured threshold override wins over the adapter's
    /// recommendation.
    pub fn run(
        &self,
        cache: &KvCache,
        transformation: &Transformation,
        source_model: &str,
        target_model: &str,
    ) -> Result<TransferOutcome, EngineError> {
        let pattern = registry::lookup(source_model);
        let settings = self.config.compression.resolve(pattern.recommended_threshold);
        let compressor = AttentionCompressor::new(settings)?;

        let started = Instant::now();
        let compressed = compressor.compress(cache)?;
        let compression_time = started.elapsed();

        let projecting = Instant::now();
        let transformed = projector::transform(&compressed, transformation, source_model, target_model)?;
        let projection_time = projecting.elapsed();

        let report = metrics::validate(&compressed, &pattern);
        let call_metrics =
            CompressionMetrics::collect(&compressed, compression_time, projection_time);

        let counters = metrics::engine_metrics();
        counters.compressions_total.inc();
        counters.tokens_in_total.inc_by(compressed.original_size as u64);
        counters.tokens_out_total.inc_by(compressed.compressed_size as u64);
        counters
            .compression_seconds
            .observe(compression_time.as_secs_f64());

        info!(
            source = source_model,
            target = target_model,
            tokens_in = compressed.original_size,
            tokens_out = compressed.compressed_size,
            coverage = compressed.cumulative_attention,
            passed = report.passed,
            "Transfer complete"
        );

        Ok(TransferOutcome {
            transformed,
            report,
            metrics: call_metrics,
        })
    }
}

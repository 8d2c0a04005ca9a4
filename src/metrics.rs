//! Quality validation and metrics collection.
//!
//! The validator grades a compression result against its model family's
//! recommendation and reports every applicable warning at once. Poor
//! compression is an expected outcome, not a bug, so this module never
//! fails — degenerate inputs produce a report with `passed: false`.
//!
//! [`CompressionMetrics`] adds byte accounting (at FP16 element width, the
//! format caches are stored in upstream) and wall-clock timings, and the
//! module exports process-wide Prometheus counters for the engine to bump.

use std::sync::OnceLock;
use std::time::Duration;

use half::f16;
use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use serde::{Deserialize, Serialize};

use crate::cache::kv::CompressedKvCache;
use crate::registry::ModelAttentionPattern;

/// Selections smaller than this are suspicious regardless of coverage.
const MIN_USEFUL_TOKENS: usize = 10;

/// Ratios above this leave little bandwidth to save.
const LIMITED_SAVINGS_RATIO: f64 = 0.5;

/// Pass/fail grade plus remediation hints for one compression result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    /// Coverage met the recommendation and enough tokens survived.
    pub passed: bool,

    /// Normalized attention mass the selection retained.
    pub attention_coverage: f64,

    /// Coarse loss proxy: `1 − attention_coverage`. A coverage complement,
    /// not a measured reconstruction error.
    pub information_loss: f64,

    pub compression_ratio: f64,

    pub selected_tokens: usize,

    pub warnings: Vec<String>,

    pub recommendations: Vec<String>,
}

/// Grade a compression result against a model family's recommendation.
///
/// All rules are evaluated; a single call reports every applicable warning.
/// Total over any input, including empty caches.
pub fn validate(
    compressed: &CompressedKvCache,
    pattern: &ModelAttentionPattern,
) -> QualityReport {
    let mut warnings = Vec::new();
    let mut recommendations = Vec::new();

    let coverage = compressed.cumulative_attention;
    let threshold = pattern.recommended_threshold;

    if coverage < threshold {
        warnings.push(format!(
            "attention coverage {:.3} below the {:.2} recommended for {} models",
            coverage, threshold, pattern.model_family
        ));
        recommendations
            .push("lower the attention threshold or raise min_tokens".to_string());
    }

    if compressed.compression_ratio > LIMITED_SAVINGS_RATIO {
        warnings.push(format!(
            "compression ratio {:.2} gives limited bandwidth savings",
            compressed.compression_ratio
        ));
        recommendations.push("raise the attention threshold".to_string());
    }

    if compressed.compressed_size < MIN_USEFUL_TOKENS {
        warnings.push(format!(
            "only {} tokens selected, may lose important context",
            compressed.compressed_size
        ));
        recommendations.push("relax the threshold or min_tokens constraints".to_string());
    }

    QualityReport {
        passed: coverage >= threshold && compressed.compressed_size >= MIN_USEFUL_TOKENS,
        attention_coverage: coverage,
        information_loss: 1.0 - coverage,
        compression_ratio: compressed.compression_ratio,
        selected_tokens: compressed.compressed_size,
        warnings,
        recommendations,
    }
}

/// Size and timing figures for one compress+project call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionMetrics {
    pub original_tokens: usize,
    pub compressed_tokens: usize,
    pub compression_ratio: f64,

    /// K+V bytes across all layers before compression, at FP16 width.
    pub original_bytes: usize,

    /// K+V bytes across all layers after compression, at FP16 width.
    pub compressed_bytes: usize,

    /// `original_bytes − compressed_bytes`.
    pub bandwidth_saved_bytes: usize,

    pub attention_coverage: f64,

    pub compression_micros: u64,

    pub projection_micros: u64,
}

impl CompressionMetrics {
    /// Collect metrics from a finished compression + projection.
    pub fn collect(
        compressed: &CompressedKvCache,
        compression_time: Duration,
        projection_time: Duration,
    ) -> Self {
        let dim = compressed.embedding_dim();
        let layers = compressed.num_layers();
        // K and V, per token per layer, stored FP16 upstream.
        let bytes_per_token = 2 * layers * dim * std::mem::size_of::<f16>();

        let original_bytes = compressed.original_size * bytes_per_token;
        let compressed_bytes = compressed.compressed_size * bytes_per_token;

        Self {
            original_tokens: compressed.original_size,
            compressed_tokens: compressed.compressed_size,
            compression_ratio: compressed.compression_ratio,
            original_bytes,
            compressed_bytes,
            bandwidth_saved_bytes: original_bytes.saturating_sub(compressed_bytes),
            attention_coverage: compressed.cumulative_attention,
            compression_micros: compression_time.as_micros() as u64,
            projection_micros: projection_time.as_micros() as u64,
        }
    }
}

/// Process-wide counters exported to Prometheus.
pub struct EngineMetrics {
    pub registry: Registry,
    pub compressions_total: IntCounter,
    pub tokens_in_total: IntCounter,
    pub tokens_out_total: IntCounter,
    pub compression_seconds: Histogram,
}

impl EngineMetrics {
    fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let compressions_total = IntCounter::with_opts(Opts::new(
            "kv_bridge_compressions_total",
            "Number of completed compression calls",
        ))?;
        let tokens_in_total = IntCounter::with_opts(Opts::new(
            "kv_bridge_tokens_in_total",
            "Tokens received for compression",
        ))?;
        let tokens_out_total = IntCounter::with_opts(Opts::new(
            "kv_bridge_tokens_out_total",
            "Tokens retained after compression",
        ))?;
        let compression_seconds = Histogram::with_opts(HistogramOpts::new(
            "kv_bridge_compression_seconds",
            "Wall-clock time of compression calls",
        ))?;

        registry.register(Box::new(compressions_total.clone()))?;
        registry.register(Box::new(tokens_in_total.clone()))?;
        registry.register(Box::new(tokens_out_total.clone()))?;
        registry.register(Box::new(compression_seconds.clone()))?;

        Ok(Self {
            registry,
            compressions_total,
            tokens_in_total,
            tokens_out_total,
            compression_seconds,
        })
    }
}

static ENGINE_METRICS: OnceLock<EngineMetrics> = OnceLock::new();

/// The process-wide metrics instance. Metric names are static and valid,
/// so registration cannot fail after first call.
pub fn engine_metrics() -> &'static EngineMetrics {
    ENGINE_METRICS.get_or_init(|| {
        EngineMetrics::new().expect("static metric registration")
    })
}

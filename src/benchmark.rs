//! Benchmark harness for the transfer engine.
//!
//! Drives compress+transform over freshly generated synthetic workloads and
//! reports wall-clock timings per model family. A performance/regression
//! signal only — nothing here asserts on timing, which is machine-dependent.

use std::time::Instant;

use rand::Rng;
use serde::Serialize;
use tracing::info;

use crate::cache::compressor::AttentionCompressor;
use crate::cache::kv::{KvCache, LayerTensor};
use crate::config::Config;
use crate::engine::{EngineError, TransferEngine};
use crate::metrics::QualityReport;
use crate::registry;
use crate::transform::wmatrix::{LinearMap, Transformation, WMatrix};

/// Synthetic layer count; enough to exercise cross-layer importance
/// summation without dominating runtime.
const BENCH_LAYERS: usize = 2;

/// Timing and quality summary of one benchmark run.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkSummary {
    pub model: String,
    pub token_count: usize,
    pub dimension: usize,
    pub iterations: usize,

    /// Mean wall-clock time of the compression stage.
    pub mean_compression_micros: u64,

    /// Mean wall-clock time of the projection stage.
    pub mean_projection_micros: u64,

    /// One sample of reconstructing a full-length cache from the final
    /// compressed result.
    pub decompression_micros: u64,

    pub mean_compression_ratio: f64,

    /// Quality report of the final iteration.
    pub final_report: QualityReport,
}

/// Run `iterations` compress+transform rounds over synthetic input for the
/// given model family.
///
/// Inputs are uniform random in `[-1, 1]` per component and regenerated per
/// iteration; attention weights are uniform random in `(0, 1)`. Failures
/// mid-run propagate unchanged.
pub fn benchmark(
    model_id: &str,
    token_count: usize,
    dimension: usize,
    iterations: usize,
) -> Result<BenchmarkSummary, EngineError> {
    let config = Config::default();
    let engine = TransferEngine::new(config.clone())?;
    let transformation = Transformation {
        wmatrix: WMatrix::Linear(LinearMap::xavier(dimension, dimension)),
        final_epsilon: 0.0,
        orthogonality_score: 1.0,
    };

    let pattern = registry::lookup(model_id);
    info!(
        model = model_id,
        attention = %pattern.attention,
        token_count,
        dimension,
        iterations,
        "Starting benchmark"
    );

    let runs = iterations.max(1);
    let mut compression_total = 0u64;
    let mut projection_total = 0u64;
    let mut ratio_total = 0.0f64;

    let mut last = engine.run(
        &synthetic_cache(token_count, dimension),
        &transformation,
        model_id,
        model_id,
    )?;
    compression_total += last.metrics.compression_micros;
    projection_total += last.metrics.projection_micros;
    ratio_total += last.metrics.compression_ratio;

    for _ in 1..runs {
        let cache = synthetic_cache(token_count, dimension);
        last = engine.run(&cache, &transformation, model_id, model_id)?;

        compression_total += last.metrics.compression_micros;
        projection_total += last.metrics.projection_micros;
        ratio_total += last.metrics.compression_ratio;
    }

    // One decompression sample over the final iteration's selection.
    let compressor = AttentionCompressor::new(
        config
            .compression
            .resolve(pattern.recommended_threshold),
    )?;
    let final_cache = synthetic_cache(token_count, dimension);
    let compressed = compressor.compress(&final_cache)?;
    let decompress_start = Instant::now();
    let _ = compressor.decompress(&compressed);
    let decompression_micros = decompress_start.elapsed().as_micros() as u64;

    Ok(BenchmarkSummary {
        model: model_id.to_string(),
        token_count,
        dimension,
        iterations: runs,
        mean_compression_micros: compression_total / runs as u64,
        mean_projection_micros: projection_total / runs as u64,
        decompression_micros,
        mean_compression_ratio: ratio_total / runs as f64,
        final_report: last.report,
    })
}

fn random_tensor(rng: &mut impl Rng, token_count: usize, dimension: usize) -> LayerTensor {
    (0..BENCH_LAYERS)
        .map(|_| {
            (0..token_count)
                .map(|_| (0..dimension).map(|_| rng.gen_range(-1.0..1.0)).collect())
                .collect()
        })
        .collect()
}

fn synthetic_cache(token_count: usize, dimension: usize) -> KvCache {
    let mut rng = rand::thread_rng();

    let keys = random_tensor(&mut rng, token_count, dimension);
    let values = random_tensor(&mut rng, token_count, dimension);

    let weights = (0..BENCH_LAYERS)
        .map(|_| (0..token_count).map(|_| rng.gen_range(0.0..1.0)).collect())
        .collect();

    KvCache::with_attention(keys, values, weights)
}

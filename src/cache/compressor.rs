//! Attention-weighted KV-cache compression.
//!
//! Ranks token positions by their attention mass summed across layers and
//! keeps the smallest set (by importance) whose normalized mass reaches
//! the configured threshold. Selection never reorders the sequence: the
//! retained positions are re-sorted into original token order before the
//! keys/values are sliced, so downstream consumers keep causal ordering.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::cache::kv::{CacheShapeError, CompressedKvCache, KvCache, LayerTensor};
use crate::config::ConfigError;

/// Slack on the cumulative-mass comparison: weights arrive as f32, so a
/// selection covering exactly 0.7 of the mass can sum to 0.699999993.
const THRESHOLD_EPS: f64 = 1e-6;

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error(transparent)]
    Shape(#[from] CacheShapeError),

    #[error("attention weights required for compression")]
    MissingAttentionWeights,
}

/// Tuning knobs for a single compressor instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompressorSettings {
    /// Fraction of normalized attention mass the selection must cover, in (0, 1].
    pub attention_threshold: f64,

    /// Never retain fewer than this many tokens (capped at the input size).
    pub min_tokens: usize,
}

impl CompressorSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.attention_threshold > 0.0 && self.attention_threshold <= 1.0) {
            return Err(ConfigError::ThresholdOutOfRange(self.attention_threshold));
        }
        Ok(())
    }
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self {
            attention_threshold: 0.90,
            min_tokens: 10,
        }
    }
}

/// The compression engine.
pub struct AttentionCompressor {
    settings: CompressorSettings,
}

impl AttentionCompressor {
    /// Create a compressor, rejecting an out-of-range threshold up front.
    pub fn new(settings: CompressorSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &CompressorSettings {
        &self.settings
    }

    /// Compress a cache by dropping tokens with negligible attention mass.
    ///
    /// Per-token importance is the attention weight summed across layers,
    /// normalized into a distribution over positions. Positions are taken
    /// greedily by descending importance until the cumulative mass reaches
    /// the threshold, then extended (still by importance) until `min_tokens`
    /// is met. If the threshold is unreachable, every token is kept.
    pub fn compress(&self, cache: &KvCache) -> Result<CompressedKvCache, CompressionError> {
        cache.validate()?;

        let weights = cache
            .attention_weights
            .as_ref()
            .filter(|w| !w.is_empty())
            .ok_or(CompressionError::MissingAttentionWeights)?;

        let num_tokens = cache.num_tokens();
        if num_tokens == 0 {
            return Ok(CompressedKvCache::empty(cache.num_layers()));
        }

        // Importance: attention mass summed across layers, per position.
        let mut importance = vec![0.0f64; num_tokens];
        for layer in weights {
            for (token, w) in layer.iter().enumerate() {
                importance[token] += f64::from(*w);
            }
        }

        let total: f64 = importance.iter().sum();
        let normalized: Vec<f64> = if total > 0.0 {
            importance.iter().map(|i| i / total).collect()
        } else {
            // Degenerate all-zero mass: the threshold is unreachable, which
            // selects everything below.
            vec![0.0; num_tokens]
        };

        // Rank positions by descending importance; earlier position wins ties
        // so selection stays deterministic.
        let mut ranked: Vec<usize> = (0..num_tokens).collect();
        ranked.sort_by(|&a, &b| {
            normalized[b]
                .partial_cmp(&normalized[a])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });

        let floor = self.settings.min_tokens.min(num_tokens);
        let mut selected = Vec::new();
        let mut cumulative = 0.0f64;
        for &pos in &ranked {
            if cumulative + THRESHOLD_EPS >= self.settings.attention_threshold
                && selected.len() >= floor
            {
                break;
            }
            selected.push(pos);
            cumulative += normalized[pos];
        }

        // Back into original token order before slicing.
        selected.sort_unstable();

        let selected_keys = slice_layers(&cache.keys, &selected);
        let selected_values = slice_layers(&cache.values, &selected);

        debug!(
            tokens_in = num_tokens,
            tokens_out = selected.len(),
            cumulative_attention = cumulative,
            "Compressed KV cache"
        );

        let compressed_size = selected.len();
        Ok(CompressedKvCache {
            selected_indices: selected,
            selected_keys,
            selected_values,
            attention_weights: weights.clone(),
            original_size: num_tokens,
            compressed_size,
            compression_ratio: compressed_size as f64 / num_tokens as f64,
            cumulative_attention: cumulative,
        })
    }

    /// Reconstruct a full-length cache from a compressed one.
    ///
    /// Discarded positions come back as zero vectors; retained positions are
    /// restored at their original indices.
    pub fn decompress(&self, compressed: &CompressedKvCache) -> (LayerTensor, LayerTensor) {
        let keys = expand_layers(
            &compressed.selected_keys,
            &compressed.selected_indices,
            compressed.original_size,
        );
        let values = expand_layers(
            &compressed.selected_values,
            &compressed.selected_indices,
            compressed.original_size,
        );
        (keys, values)
    }
}

fn slice_layers(layers: &LayerTensor, indices: &[usize]) -> LayerTensor {
    layers
        .iter()
        .map(|layer| indices.iter().map(|&i| layer[i].clone()).collect())
        .collect()
}

fn expand_layers(layers: &LayerTensor, indices: &[usize], original_len: usize) -> LayerTensor {
    layers
        .iter()
        .map(|layer| {
            let dim = layer.first().map(|t| t.len()).unwrap_or(0);
            let mut full = vec![vec![0.0f32; dim]; original_len];
            for (slot, &pos) in indices.iter().enumerate() {
                full[pos] = layer[slot].clone();
            }
            full
        })
        .collect()
}

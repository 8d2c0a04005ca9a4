//! KV-cache data model.
//!
//! A [`KvCache`] holds per-layer key/value embeddings plus the per-token
//! attention mass the inference engine aggregated across heads. Caches are
//! immutable once handed to this crate; compression and projection produce
//! new values rather than mutating their input.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-layer token embeddings: `[layer][token][dim]`.
pub type LayerTensor = Vec<Vec<Vec<f32>>>;

/// Per-layer scalar attention mass: `[layer][token]`.
pub type LayerWeights = Vec<Vec<f32>>;

/// Shape violations in a cache handed to the engine.
///
/// Every entry point validates before touching data, so a shape error
/// never leaves partial state behind.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheShapeError {
    #[error("layer count mismatch: {keys} key layers vs {values} value layers")]
    LayerCountMismatch { keys: usize, values: usize },

    #[error("token count mismatch in layer {layer}: {keys} keys vs {values} values")]
    TokenCountMismatch {
        layer: usize,
        keys: usize,
        values: usize,
    },

    #[error("ragged embedding in layer {layer}: token {token} has dim {dim}, expected {expected}")]
    RaggedEmbedding {
        layer: usize,
        token: usize,
        dim: usize,
        expected: usize,
    },

    #[error("attention weights cover {weights} layers but cache has {layers}")]
    WeightLayerMismatch { weights: usize, layers: usize },

    #[error("attention weights in layer {layer} cover {weights} tokens but cache has {tokens}")]
    WeightTokenMismatch {
        layer: usize,
        weights: usize,
        tokens: usize,
    },
}

/// A transformer's per-layer key/value cache for one sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvCache {
    /// Key embeddings, `[layer][token][dim]`.
    pub keys: LayerTensor,

    /// Value embeddings, `[layer][token][dim]`.
    pub values: LayerTensor,

    /// Aggregated attention mass per token per layer, if the producer
    /// recorded it. Required for attention-weighted compression.
    pub attention_weights: Option<LayerWeights>,
}

impl KvCache {
    /// Create a cache without attention weights.
    pub fn new(keys: LayerTensor, values: LayerTensor) -> Self {
        Self {
            keys,
            values,
            attention_weights: None,
        }
    }

    /// Create a cache with attention weights attached.
    pub fn with_attention(
        keys: LayerTensor,
        values: LayerTensor,
        attention_weights: LayerWeights,
    ) -> Self {
        Self {
            keys,
            values,
            attention_weights: Some(attention_weights),
        }
    }

    /// Number of layers.
    pub fn num_layers(&self) -> usize {
        self.keys.len()
    }

    /// Number of tokens (all layers hold the same count once validated).
    pub fn num_tokens(&self) -> usize {
        self.keys.first().map(|layer| layer.len()).unwrap_or(0)
    }

    /// Embedding dimension of the first layer's first token, or 0 when empty.
    pub fn embedding_dim(&self) -> usize {
        self.keys
            .first()
            .and_then(|layer| layer.first())
            .map(|token| token.len())
            .unwrap_or(0)
    }

    /// Check the layer/token/dim invariants.
    ///
    /// Keys and values must agree on layer count and per-layer token count;
    /// all tokens within a layer share one embedding dimension; attention
    /// weights, when present, must align layer-for-layer and token-for-token.
    pub fn validate(&self) -> Result<(), CacheShapeError> {
        if self.keys.len() != self.values.len() {
            return Err(CacheShapeError::LayerCountMismatch {
                keys: self.keys.len(),
                values: self.values.len(),
            });
        }

        for (layer, (k, v)) in self.keys.iter().zip(self.values.iter()).enumerate() {
            if k.len() != v.len() {
                return Err(CacheShapeError::TokenCountMismatch {
                    layer,
                    keys: k.len(),
                    values: v.len(),
                });
            }

            let expected = k.first().map(|t| t.len()).unwrap_or(0);
            for side in [k, v] {
                for (token, emb) in side.iter().enumerate() {
                    if emb.len() != expected {
                        return Err(CacheShapeError::RaggedEmbedding {
                            layer,
                            token,
                            dim: emb.len(),
                            expected,
                        });
                    }
                }
            }
        }

        if let Some(weights) = &self.attention_weights {
            if weights.len() != self.keys.len() {
                return Err(CacheShapeError::WeightLayerMismatch {
                    weights: weights.len(),
                    layers: self.keys.len(),
                });
            }
            for (layer, (w, k)) in weights.iter().zip(self.keys.iter()).enumerate() {
                if w.len() != k.len() {
                    return Err(CacheShapeError::WeightTokenMismatch {
                        layer,
                        weights: w.len(),
                        tokens: k.len(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// The result of attention-weighted compression: the retained subset of a
/// [`KvCache`], re-indexed but order-preserving.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressedKvCache {
    /// Retained token positions in the original sequence, strictly ascending.
    pub selected_indices: Vec<usize>,

    /// Keys for the retained tokens, `[layer][selected][dim]`.
    pub selected_keys: LayerTensor,

    /// Values for the retained tokens, `[layer][selected][dim]`.
    pub selected_values: LayerTensor,

    /// The original per-layer attention weights, carried through unchanged.
    pub attention_weights: LayerWeights,

    /// Token count before compression.
    pub original_size: usize,

    /// Token count after compression.
    pub compressed_size: usize,

    /// `compressed_size / original_size` (0 for an empty input).
    pub compression_ratio: f64,

    /// Normalized attention mass retained by the selection.
    pub cumulative_attention: f64,
}

impl CompressedKvCache {
    /// An empty compressed cache with the given layer count.
    ///
    /// Produced when a zero-token buffer is flushed.
    pub fn empty(num_layers: usize) -> Self {
        Self {
            selected_indices: Vec::new(),
            selected_keys: vec![Vec::new(); num_layers],
            selected_values: vec![Vec::new(); num_layers],
            attention_weights: vec![Vec::new(); num_layers],
            original_size: 0,
            compressed_size: 0,
            compression_ratio: 0.0,
            cumulative_attention: 0.0,
        }
    }

    /// Number of layers.
    pub fn num_layers(&self) -> usize {
        self.selected_keys.len()
    }

    /// Embedding dimension, or 0 when no tokens were retained.
    pub fn embedding_dim(&self) -> usize {
        self.selected_keys
            .first()
            .and_then(|layer| layer.first())
            .map(|token| token.len())
            .unwrap_or(0)
    }

    /// Whether no tokens were retained.
    pub fn is_empty(&self) -> bool {
        self.selected_indices.is_empty()
    }
}

/// A compressed cache re-projected into a target model's latent space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformedKvCache {
    /// Projected keys, `[layer][selected][target_dim]`.
    pub keys: LayerTensor,

    /// Projected values, `[layer][selected][target_dim]`.
    pub values: LayerTensor,

    /// Original-sequence positions of the retained tokens.
    pub selected_indices: Vec<usize>,

    /// Model the cache was produced by.
    pub source_model: String,

    /// Model the cache was projected into.
    pub target_model: String,

    /// Quality score inherited verbatim from the trained transformation.
    pub transformation_epsilon: f64,

    /// Token count of the uncompressed source cache.
    pub original_token_count: usize,

    /// Token count after compression and projection.
    pub transformed_token_count: usize,
}

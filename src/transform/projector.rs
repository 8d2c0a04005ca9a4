//! Cross-model projection of compressed caches.
//!
//! Applies a trained [`Transformation`] to every retained key/value vector
//! in every layer, producing a cache expressed in the target model's latent
//! space. Dimensional consistency is the only validation performed here;
//! training correctness is the supplier's problem.

use tracing::debug;

use crate::cache::kv::{CompressedKvCache, LayerTensor, TransformedKvCache};
use crate::transform::wmatrix::{
    alignment_confidence, alignment_loss, ProjectionError, Transformation,
};

/// Project a compressed cache into `target_model`'s latent space.
///
/// Every key and value vector passes through the transformation
/// independently; output width is whatever the trained map produces.
/// A vector whose width does not match the map's input width fails with
/// [`ProjectionError::DimensionMismatch`] before any output is built.
pub fn transform(
    compressed: &CompressedKvCache,
    transformation: &Transformation,
    source_model: &str,
    target_model: &str,
) -> Result<TransformedKvCache, ProjectionError> {
    let keys = project_layers(&compressed.selected_keys, transformation)?;
    let values = project_layers(&compressed.selected_values, transformation)?;

    let (confidence, loss) = alignment_stats(&compressed.selected_keys, &keys);
    debug!(
        source = source_model,
        target = target_model,
        tokens = compressed.compressed_size,
        source_dim = transformation.wmatrix.input_dim(),
        target_dim = transformation.wmatrix.output_dim(),
        mean_alignment_confidence = confidence,
        mean_alignment_loss = loss,
        "Projected KV cache"
    );

    Ok(TransformedKvCache {
        keys,
        values,
        selected_indices: compressed.selected_indices.clone(),
        source_model: source_model.to_string(),
        target_model: target_model.to_string(),
        transformation_epsilon: transformation.final_epsilon,
        original_token_count: compressed.original_size,
        transformed_token_count: compressed.compressed_size,
    })
}

/// Mean alignment confidence and norm-drift loss over all projected keys.
fn alignment_stats(inputs: &LayerTensor, outputs: &LayerTensor) -> (f64, f64) {
    let mut confidence = 0.0;
    let mut loss = 0.0;
    let mut count = 0usize;

    for (input_layer, output_layer) in inputs.iter().zip(outputs.iter()) {
        for (input, output) in input_layer.iter().zip(output_layer.iter()) {
            confidence += alignment_confidence(output);
            loss += alignment_loss(input, output);
            count += 1;
        }
    }

    if count == 0 {
        (0.0, 0.0)
    } else {
        (confidence / count as f64, loss / count as f64)
    }
}

fn project_layers(
    layers: &LayerTensor,
    transformation: &Transformation,
) -> Result<LayerTensor, ProjectionError> {
    layers
        .iter()
        .map(|layer| {
            layer
                .iter()
                .map(|vector| transformation.wmatrix.forward(vector))
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::compressor::{AttentionCompressor, CompressorSettings};
    use crate::cache::kv::KvCache;
    use crate::transform::wmatrix::{Activation, LinearMap, MlpHead, WMatrix};

    fn compressed(tokens: usize, dim: usize) -> CompressedKvCache {
        let keys = vec![(0..tokens).map(|t| vec![t as f32; dim]).collect::<Vec<_>>()];
        let cache = KvCache::with_attention(keys.clone(), keys, vec![vec![1.0; tokens]]);
        AttentionCompressor::new(CompressorSettings {
            attention_threshold: 1.0,
            min_tokens: 0,
        })
        .unwrap()
        .compress(&cache)
        .unwrap()
    }

    fn scaling_transformation(dim: usize, out_dim: usize, factor: f32) -> Transformation {
        let weights = (0..out_dim)
            .map(|i| {
                (0..dim)
                    .map(|j| if i == j { factor } else { 0.0 })
                    .collect()
            })
            .collect();
        Transformation {
            wmatrix: WMatrix::Linear(LinearMap {
                weights,
                biases: vec![0.0; out_dim],
            }),
            final_epsilon: 0.05,
            orthogonality_score: 0.98,
        }
    }

    #[test]
    fn test_linear_projection_changes_width() {
        let input = compressed(4, 8);
        let transformation = scaling_transformation(8, 16, 2.0);

        let out = transform(&input, &transformation, "llama-3-8b", "mistral-7b").unwrap();
        assert_eq!(out.keys[0].len(), 4);
        assert_eq!(out.keys[0][0].len(), 16);
        assert_eq!(out.source_model, "llama-3-8b");
        assert_eq!(out.target_model, "mistral-7b");
        assert_eq!(out.transformed_token_count, 4);
        assert_eq!(out.original_token_count, 4);
        assert!((out.transformation_epsilon - 0.05).abs() < 1e-12);

        // token 2's embedding is all 2.0, doubled into the first 8 slots
        assert_eq!(out.keys[0][2][0], 4.0);
        assert_eq!(out.keys[0][2][8], 0.0);
    }

    #[test]
    fn test_width_mismatch_fails_fast() {
        let input = compressed(4, 8);
        let transformation = scaling_transformation(6, 6, 1.0);

        let err = transform(&input, &transformation, "a", "b").unwrap_err();
        assert_eq!(
            err,
            ProjectionError::DimensionMismatch {
                expected: 6,
                actual: 8
            }
        );
    }

    #[test]
    fn test_mlp_projection_preserves_token_order() {
        let input = compressed(6, 8);
        let transformation = Transformation {
            wmatrix: WMatrix::NonLinear(MlpHead::xavier(8, 12, Activation::Gelu)),
            final_epsilon: 0.2,
            orthogonality_score: 0.5,
        };

        let out = transform(&input, &transformation, "gpt2", "bert-base").unwrap();
        assert_eq!(out.selected_indices, input.selected_indices);
        assert_eq!(out.values[0].len(), 6);
        assert!(out.values[0].iter().all(|v| v.len() == 12));
    }

    #[test]
    fn test_projection_is_deterministic() {
        let input = compressed(3, 8);
        let transformation = Transformation {
            wmatrix: WMatrix::NonLinear(MlpHead::xavier(8, 8, Activation::Tanh)),
            final_epsilon: 0.1,
            orthogonality_score: 0.9,
        };

        let a = transform(&input, &transformation, "s", "t").unwrap();
        let b = transform(&input, &transformation, "s", "t").unwrap();
        assert_eq!(a.keys, b.keys);
        assert_eq!(a.values, b.values);
    }
}

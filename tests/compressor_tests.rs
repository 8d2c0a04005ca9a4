//! Integration tests for attention-weighted compression.

use kv_cache_bridge::cache::compressor::{AttentionCompressor, CompressorSettings};
use kv_cache_bridge::cache::kv::KvCache;

fn compressor(threshold: f64, min_tokens: usize) -> AttentionCompressor {
    AttentionCompressor::new(CompressorSettings {
        attention_threshold: threshold,
        min_tokens,
    })
    .unwrap()
}

fn multi_layer_cache(weights_per_layer: Vec<Vec<f32>>, dim: usize) -> KvCache {
    let tokens = weights_per_layer[0].len();
    let layer: Vec<Vec<f32>> = (0..tokens).map(|t| vec![t as f32; dim]).collect();
    let layers = weights_per_layer.len();
    KvCache::with_attention(
        vec![layer.clone(); layers],
        vec![layer; layers],
        weights_per_layer,
    )
}

#[test]
fn test_importance_sums_across_layers() {
    // Token 2 is weak in layer 0 but dominant in layer 1; summed across
    // layers it outranks token 0.
    let cache = multi_layer_cache(
        vec![vec![0.3, 0.1, 0.2], vec![0.1, 0.1, 0.9]],
        8,
    );
    let compressed = compressor(0.5, 1).compress(&cache).unwrap();

    assert_eq!(compressed.selected_indices, vec![2]);
}

#[test]
fn test_selected_slices_match_original_vectors() {
    let cache = multi_layer_cache(vec![vec![0.1, 0.6, 0.3]], 4);
    let compressed = compressor(0.6, 1).compress(&cache).unwrap();

    assert_eq!(compressed.selected_indices, vec![1]);
    assert_eq!(compressed.selected_keys[0][0], vec![1.0; 4]);
    assert_eq!(compressed.selected_values[0][0], vec![1.0; 4]);
}

#[test]
fn test_attention_weights_carried_through_unchanged() {
    let weights = vec![vec![0.5, 0.25, 0.25]];
    let cache = multi_layer_cache(weights.clone(), 4);
    let compressed = compressor(0.5, 1).compress(&cache).unwrap();

    assert_eq!(compressed.attention_weights, weights);
}

#[test]
fn test_threshold_satisfaction_over_many_shapes() {
    for tokens in [1usize, 2, 10, 57, 200] {
        let weights: Vec<f32> = (0..tokens).map(|t| ((t * 7919) % 101) as f32 + 1.0).collect();
        let cache = multi_layer_cache(vec![weights], 4);

        for threshold in [0.25, 0.5, 0.75, 0.95] {
            let compressed = compressor(threshold, 0).compress(&cache).unwrap();
            assert!(
                compressed.cumulative_attention >= threshold - 1e-6,
                "threshold {threshold} unmet for {tokens} tokens"
            );
            assert!(compressed
                .selected_indices
                .windows(2)
                .all(|pair| pair[0] < pair[1]));
        }
    }
}

#[test]
fn test_floor_respected_even_with_tiny_threshold() {
    let cache = multi_layer_cache(vec![vec![100.0, 1.0, 1.0, 1.0, 1.0]], 4);
    let compressed = compressor(0.1, 4).compress(&cache).unwrap();

    assert_eq!(compressed.compressed_size, 4);
    assert!(compressed.selected_indices.contains(&0));
}

#[test]
fn test_compress_decompress_roundtrip_shape() {
    let cache = multi_layer_cache(vec![vec![0.4, 0.3, 0.2, 0.1], vec![0.1, 0.2, 0.3, 0.4]], 8);
    let comp = compressor(0.6, 1);
    let compressed = comp.compress(&cache).unwrap();

    let (keys, values) = comp.decompress(&compressed);
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0].len(), 4);
    assert_eq!(values[1].len(), 4);

    // retained positions carry their original embeddings
    for (slot, &pos) in compressed.selected_indices.iter().enumerate() {
        assert_eq!(keys[0][pos], compressed.selected_keys[0][slot]);
    }
}

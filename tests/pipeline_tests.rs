//! Integration tests for the streaming compression pipeline.

use futures::StreamExt;

use kv_cache_bridge::cache::compressor::{AttentionCompressor, CompressorSettings};
use kv_cache_bridge::cache::pipeline::{StreamingPipeline, TokenBatch};
use kv_cache_bridge::config::StreamingConfig;

fn pipeline(chunk_size: usize) -> StreamingPipeline {
    let compressor = AttentionCompressor::new(CompressorSettings {
        attention_threshold: 0.9,
        min_tokens: 1,
    })
    .unwrap();
    StreamingPipeline::new(compressor, StreamingConfig { chunk_size }).unwrap()
}

fn batch(tokens: usize, dim: usize, layers: usize) -> TokenBatch {
    let layer: Vec<Vec<f32>> = (0..tokens)
        .map(|t| (0..dim).map(|d| ((t + d) as f32).sin()).collect())
        .collect();
    TokenBatch {
        keys: vec![layer.clone(); layers],
        values: vec![layer.clone(); layers],
        queries: vec![layer; layers],
    }
}

#[test]
fn test_incremental_ingestion_until_chunk() {
    let mut pipe = pipeline(32);

    for _ in 0..7 {
        assert!(pipe.add_tokens(batch(4, 8, 2)).unwrap().is_none());
    }
    assert_eq!(pipe.buffered_tokens(), 28);

    let chunk = pipe.add_tokens(batch(4, 8, 2)).unwrap().expect("chunk at 32");
    assert_eq!(chunk.original_size, 32);
    assert_eq!(pipe.buffered_tokens(), 0);
}

#[test]
fn test_flush_drains_partial_buffer() {
    let mut pipe = pipeline(100);
    pipe.add_tokens(batch(12, 8, 1)).unwrap();

    let chunk = pipe.flush().unwrap();
    assert_eq!(chunk.original_size, 12);
    assert_eq!(pipe.buffered_tokens(), 0);

    // flushing again is an empty chunk, not an error
    let empty = pipe.flush().unwrap();
    assert_eq!(empty.original_size, 0);
}

#[test]
fn test_chunk_indices_are_ordered() {
    let mut pipe = pipeline(16);
    let chunk = pipe.add_tokens(batch(16, 8, 1)).unwrap().expect("chunk");

    assert!(chunk
        .selected_indices
        .windows(2)
        .all(|pair| pair[0] < pair[1]));
    assert!(chunk.compressed_size >= 1);
}

#[tokio::test]
async fn test_stream_conserves_tokens_across_chunk_boundaries() {
    // 10 batches of 7 tokens with chunk size 16: chunks land at 21, 42, ...
    // and a 7-token tail must flush at the end.
    let batches: Vec<TokenBatch> = (0..10).map(|_| batch(7, 4, 1)).collect();
    let source = futures::stream::iter(batches);

    let chunks: Vec<_> = pipeline(16).stream_compress(source).collect().await;

    let total: usize = chunks
        .iter()
        .map(|c| c.as_ref().unwrap().original_size)
        .sum();
    assert_eq!(total, 70);

    // FIFO: every chunk except the last covers at least chunk_size tokens
    for chunk in &chunks[..chunks.len() - 1] {
        assert!(chunk.as_ref().unwrap().original_size >= 16);
    }
}

#[tokio::test]
async fn test_stream_with_exact_multiple_has_no_tail() {
    let batches: Vec<TokenBatch> = (0..4).map(|_| batch(8, 4, 1)).collect();
    let source = futures::stream::iter(batches);

    let chunks: Vec<_> = pipeline(8).stream_compress(source).collect().await;
    assert_eq!(chunks.len(), 4);
    assert!(chunks
        .iter()
        .all(|c| c.as_ref().unwrap().original_size == 8));
}

#[tokio::test]
async fn test_stream_from_channel_source() {
    use tokio_stream::wrappers::ReceiverStream;

    let (tx, rx) = tokio::sync::mpsc::channel(4);
    let producer = tokio::spawn(async move {
        for _ in 0..3 {
            tx.send(batch(5, 4, 1)).await.unwrap();
        }
    });

    let chunks: Vec<_> = pipeline(10)
        .stream_compress(ReceiverStream::new(rx))
        .collect()
        .await;
    producer.await.unwrap();

    let total: usize = chunks
        .iter()
        .map(|c| c.as_ref().unwrap().original_size)
        .sum();
    assert_eq!(total, 15);
}

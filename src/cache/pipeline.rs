//! Streaming compression pipeline.
//!
//! Buffers incoming token batches and compresses the buffer once it reaches
//! the configured chunk size, or on explicit flush. The pipeline is an
//! explicit state machine — `{buffer, chunk_size} → (maybe chunk, new state)`
//! — rather than implicit coroutine control flow, so the flush-on-end
//! transition is an ordinary terminal step.
//!
//! One pipeline instance per logical stream: `add_tokens` takes `&mut self`,
//! which rules out concurrent ingestion on a single instance at compile time.

use futures::stream::{Stream, StreamExt};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::cache::compressor::{AttentionCompressor, CompressionError};
use crate::cache::kv::{CompressedKvCache, KvCache, LayerTensor, LayerWeights};
use crate::config::{ConfigError, StreamingConfig};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Compression(#[from] CompressionError),

    #[error("batch layer count {got} does not match buffered {expected}")]
    BatchLayerMismatch { expected: usize, got: usize },

    #[error("batch keys/values/queries disagree on shape in layer {layer}")]
    BatchShapeMismatch { layer: usize },
}

/// One step's worth of tokens from the upstream decoder.
///
/// Queries ride along so the pipeline can weigh buffered tokens at
/// compression time (attention weights only exist after a full forward
/// pass, which a streaming producer does not have yet).
#[derive(Debug, Clone)]
pub struct TokenBatch {
    /// New keys, `[layer][token][dim]`.
    pub keys: LayerTensor,

    /// New values, `[layer][token][dim]`.
    pub values: LayerTensor,

    /// Query vectors for the new tokens, `[layer][token][dim]`.
    pub queries: LayerTensor,
}

impl TokenBatch {
    fn validate(&self) -> Result<(), PipelineError> {
        if self.keys.len() != self.values.len() || self.keys.len() != self.queries.len() {
            return Err(PipelineError::BatchShapeMismatch { layer: 0 });
        }
        for (layer, ((k, v), q)) in self
            .keys
            .iter()
            .zip(self.values.iter())
            .zip(self.queries.iter())
            .enumerate()
        {
            if k.len() != v.len() || k.len() != q.len() {
                return Err(PipelineError::BatchShapeMismatch { layer });
            }
        }
        Ok(())
    }

    /// Tokens carried by this batch.
    pub fn num_tokens(&self) -> usize {
        self.keys.first().map(|layer| layer.len()).unwrap_or(0)
    }
}

/// Buffered per-layer state between chunk boundaries.
#[derive(Debug, Default)]
struct TokenBuffer {
    keys: LayerTensor,
    values: LayerTensor,
    queries: LayerTensor,
}

impl TokenBuffer {
    fn num_tokens(&self) -> usize {
        self.keys.first().map(|layer| layer.len()).unwrap_or(0)
    }

    fn num_layers(&self) -> usize {
        self.keys.len()
    }

    fn append(&mut self, batch: TokenBatch) -> Result<(), PipelineError> {
        if self.keys.is_empty() {
            self.keys = batch.keys;
            self.values = batch.values;
            self.queries = batch.queries;
            return Ok(());
        }
        if batch.keys.len() != self.keys.len() {
            return Err(PipelineError::BatchLayerMismatch {
                expected: self.keys.len(),
                got: batch.keys.len(),
            });
        }
        for (layer, (k, v)) in batch
            .keys
            .into_iter()
            .zip(batch.values.into_iter())
            .enumerate()
        {
            self.keys[layer].extend(k);
            self.values[layer].extend(v);
        }
        for (layer, q) in batch.queries.into_iter().enumerate() {
            self.queries[layer].extend(q);
        }
        Ok(())
    }

    fn take(&mut self) -> TokenBuffer {
        std::mem::take(self)
    }
}

/// Streaming compression over an unbounded token source.
pub struct StreamingPipeline {
    compressor: AttentionCompressor,
    config: StreamingConfig,
    buffer: TokenBuffer,
    stream_id: Uuid,
}

impl StreamingPipeline {
    pub fn new(
        compressor: AttentionCompressor,
        config: StreamingConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            compressor,
            config,
            buffer: TokenBuffer::default(),
            stream_id: Uuid::new_v4(),
        })
    }

    /// Tokens currently buffered and not yet compressed.
    pub fn buffered_tokens(&self) -> usize {
        self.buffer.num_tokens()
    }

    /// Identifier of this logical stream (appears in logs).
    pub fn stream_id(&self) -> Uuid {
        self.stream_id
    }

    /// Append a batch; returns a compressed chunk once the buffer has
    /// reached the configured chunk size, `None` otherwise.
    pub fn add_tokens(
        &mut self,
        batch: TokenBatch,
    ) -> Result<Option<CompressedKvCache>, PipelineError> {
        batch.validate()?;
        self.buffer.append(batch)?;

        if self.buffer.num_tokens() >= self.config.chunk_size {
            return self.compress_buffer().map(Some);
        }
        Ok(None)
    }

    /// Compress whatever is buffered, including nothing.
    ///
    /// An empty buffer flushes to an empty [`CompressedKvCache`], not an
    /// error, so callers can always terminate a stream with a flush.
    pub fn flush(&mut self) -> Result<CompressedKvCache, PipelineError> {
        self.compress_buffer()
    }

    fn compress_buffer(&mut self) -> Result<CompressedKvCache, PipelineError> {
        let buffer = self.buffer.take();
        if buffer.num_tokens() == 0 {
            return Ok(CompressedKvCache::empty(buffer.num_layers()));
        }

        let weights = derive_attention_weights(&buffer.keys, &buffer.queries);
        let cache = KvCache::with_attention(buffer.keys, buffer.values, weights);
        let chunk = self.compressor.compress(&cache)?;

        debug!(
            stream_id = %self.stream_id,
            chunk_tokens = chunk.original_size,
            retained = chunk.compressed_size,
            "Compressed streaming chunk"
        );
        Ok(chunk)
    }

    /// Consume a finite or unbounded source of batches, yielding compressed
    /// chunks in arrival order (strict FIFO). When the source ends, a
    /// non-empty tail buffer is flushed exactly once. Dropping the returned
    /// stream abandons any still-buffered tokens.
    pub fn stream_compress<S>(
        self,
        source: S,
    ) -> impl Stream<Item = Result<CompressedKvCache, PipelineError>>
    where
        S: Stream<Item = TokenBatch> + Unpin,
    {
        futures::stream::unfold(
            (self, source, false),
            |(mut pipeline, mut source, done)| async move {
                if done {
                    return None;
                }
                loop {
                    match source.next().await {
                        Some(batch) => match pipeline.add_tokens(batch) {
                            Ok(Some(chunk)) => return Some((Ok(chunk), (pipeline, source, false))),
                            Ok(None) => continue,
                            Err(e) => return Some((Err(e), (pipeline, source, true))),
                        },
                        None => {
                            if pipeline.buffered_tokens() == 0 {
                                return None;
                            }
                            let tail = pipeline.flush();
                            return Some((tail, (pipeline, source, true)));
                        }
                    }
                }
            },
        )
    }
}

/// Score each buffered token per layer by the newest query's attention over
/// the window: softmax of scaled dot products against that layer's keys.
fn derive_attention_weights(keys: &LayerTensor, queries: &LayerTensor) -> LayerWeights {
    keys.iter()
        .zip(queries.iter())
        .map(|(layer_keys, layer_queries)| {
            let probe = match layer_queries.last() {
                Some(q) if !q.is_empty() => q,
                _ => return vec![1.0; layer_keys.len()],
            };
            let scale = (probe.len() as f32).sqrt();

            let logits: Vec<f32> = layer_keys
                .iter()
                .map(|k| dot(probe, k) / scale)
                .collect();

            softmax(&logits)
        })
        .collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 {
        exps.iter().map(|e| e / sum).collect()
    } else {
        vec![0.0; logits.len()]
    }
}

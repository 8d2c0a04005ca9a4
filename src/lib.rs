//! kv-cache-bridge: cross-model KV-cache transfer.
//!
//! Compresses a transformer's per-layer key/value cache by dropping tokens
//! whose attention contribution is negligible, then re-projects the retained
//! vectors from a source model's latent space into a target model's through
//! a trained transformation:
//!
//!   raw keys/values/attention → [`cache::compressor`] → [`transform::projector`]
//!   → [`metrics`] quality report → caller
//!
//! [`cache::pipeline`] wraps the compressor for continuous token arrival;
//! [`engine`] is the one-call façade an inference process uses.

pub mod benchmark;
pub mod cache;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod registry;
pub mod transform;

pub use cache::compressor::{AttentionCompressor, CompressionError, CompressorSettings};
pub use cache::kv::{CompressedKvCache, KvCache, TransformedKvCache};
pub use cache::pipeline::{PipelineError, StreamingPipeline, TokenBatch};
pub use config::{Config, ConfigError};
pub use engine::{EngineError, TransferEngine, TransferOutcome};
pub use metrics::{CompressionMetrics, QualityReport};
pub use registry::{lookup, AttentionKind, ModelAttentionPattern};
pub use transform::wmatrix::{Activation, LinearMap, MlpHead, Transformation, WMatrix};

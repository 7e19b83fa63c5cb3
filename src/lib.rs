//! Doppler: a browser-native, GPU-accelerated inference pipeline core for
//! quantized decoder-only transformers.
//!
//! This crate is the model-agnostic core: device/buffer management, the
//! numeric kernel family (embedding gather, RMSNorm, RoPE, attention,
//! matmul, SiLU-gated FFN, reduction/sampling primitives), the KV cache,
//! the weight loader, and the prefill/decode orchestrator. It does not
//! ship a tokenizer, a chat template, or a model zoo — those live in the
//! embedding harness.
//!
//! ## Example
//!
//! ```ignore
//! use doppler_core::{EngineConfig, Pipeline, SamplingOptions};
//! use doppler_core::weights::WeightLoader;
//!
//! let weights = WeightLoader::new(&manifest, &reader, false).load(true)?;
//! let pipeline = Pipeline::new(manifest, weights, EngineConfig::default())?;
//! let mut stream = pipeline.generate(prompt_ids, SamplingOptions::default(), cancel);
//! ```

pub mod config;
pub mod dispatch;
pub mod gpu;
pub mod kernels;
pub mod kv_cache;
pub mod layer;
pub mod manifest;
pub mod metrics;
pub mod pipeline;
pub mod profiler;
pub mod quant;
pub mod sampler;
pub mod shard;
pub mod utils;
pub mod weights;

pub use config::EngineConfig;
pub use gpu::{BufferPool, BufferUsage, Device, DeviceFeatures, PoolStats};
pub use manifest::Manifest;
pub use metrics::EngineSnapshot;
pub use pipeline::{GeneratedToken, Pipeline, PipelineState, StopReason};
pub use profiler::{ProfilerSnapshot, Scope, SubmitTracker};
pub use sampler::SamplingOptions;
pub use utils::error::{DopplerError, Result};
pub use utils::init_tracing;
pub use weights::{RealizedTensor, WeightLoader, Weights};

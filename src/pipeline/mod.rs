//! Pipeline orchestrator (spec §4.7): the state machine that drives
//! embedding lookup, stacked layer execution, final norm, logits
//! projection, and sampling across a prefill pass and a decode loop.
//!
//! Grounded on the teacher's `InferenceEngine` + `inference::queue`
//! streaming shape: callers get a lazy sequence of tokens, and
//! cancellation is checked between steps rather than mid-step.

use std::pin::Pin;
use std::time::Instant;

use async_stream::try_stream;
use futures::Stream;
use rand_chacha::ChaCha8Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::kernels::gather::{gather, EmbeddingTable};
use crate::kernels::matmul::matmul_dispatched;
use crate::kernels::rmsnorm::rmsnorm;
use crate::kv_cache::KvCache;
use crate::layer::{LayerBlock, Mode};
use crate::manifest::{DType, Manifest};
use crate::profiler::{Scope, SubmitTracker};
use crate::sampler::{self, SamplingOptions};
use crate::utils::error::{DopplerError, Result};
use crate::weights::Weights;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Prefill,
    Decoding,
    Stopped,
    /// A host-side readback (the logits projection step) exceeded
    /// `EngineConfig::readback_timeout` (spec §5). No further generation
    /// is possible until `reset()` runs on a fresh device.
    Poisoned,
}

#[derive(Debug, Clone, Copy)]
pub enum StopReason {
    StopToken,
    MaxTokens,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct GeneratedToken {
    pub token_id: u32,
    pub position: usize,
    pub stop: Option<StopReason>,
}

/// Owns the KV cache, weights, and manifest for one generation context.
/// Exclusively owned — concurrent generations require separate pipelines
/// (spec §5).
pub struct Pipeline {
    manifest: Manifest,
    weights: Weights,
    kv: KvCache,
    config: EngineConfig,
    profiler: SubmitTracker,
    state: PipelineState,
}

fn embedding_table(weights: &Weights, hidden_size: usize) -> Result<EmbeddingTable<'_>> {
    let embed = weights.require("token_embd.weight")?;
    match embed.dtype {
        DType::F32 => Ok(EmbeddingTable::F32 {
            data: bytemuck::cast_slice(&embed.bytes),
            hidden_size,
        }),
        DType::F16 => Ok(EmbeddingTable::F16 {
            data: bytemuck::cast_slice(&embed.bytes),
            hidden_size,
        }),
        DType::Q4K => Ok(EmbeddingTable::Q4K {
            blocks: &embed.bytes,
            hidden_size,
        }),
        other => Err(DopplerError::DtypeMismatch(format!(
            "embedding table dtype {other:?} has no gather kernel variant"
        ))),
    }
}

impl Pipeline {
    pub fn new(manifest: Manifest, weights: Weights, config: EngineConfig) -> Result<Self> {
        manifest.validate()?;
        let smax = manifest.max_position;
        let kv = KvCache::new(manifest.num_layers, manifest.num_kv_heads, manifest.head_dim, smax)
            .with_sliding_window(manifest.sliding_window_size);
        let debug = config.debug;
        Ok(Self {
            manifest,
            weights,
            kv,
            config,
            profiler: SubmitTracker::new(debug),
            state: PipelineState::Idle,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn profiler(&self) -> &SubmitTracker {
        &self.profiler
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Clear the KV cache and return to `Idle` (spec §4.7), also lifting
    /// any `DeviceLost` poisoning on the assumption the caller has
    /// reacquired a fresh device.
    pub fn reset(&mut self) {
        self.kv.reset();
        self.state = PipelineState::Idle;
        debug!("pipeline reset");
    }

    /// Reject further work while poisoned by a prior `DeviceLost` (spec
    /// §5): only `reset()` clears this.
    fn ensure_not_poisoned(&self) -> Result<()> {
        if self.state == PipelineState::Poisoned {
            return Err(DopplerError::DeviceLost(
                "pipeline poisoned by a prior readback timeout, call reset() on a fresh device".to_string(),
            ));
        }
        Ok(())
    }

    /// Poison the pipeline and return `DeviceLost` if `elapsed` overran
    /// `readback_timeout` (spec §5's abort condition for a wedged GPU
    /// readback).
    fn check_readback_timeout(&mut self, elapsed: std::time::Duration, context: &str) -> Result<()> {
        if elapsed > self.config.readback_timeout {
            self.state = PipelineState::Poisoned;
            warn!(?elapsed, timeout = ?self.config.readback_timeout, context, "readback exceeded timeout, pipeline poisoned");
            return Err(DopplerError::DeviceLost(format!(
                "{context} took {elapsed:?}, exceeding readback_timeout {:?}",
                self.config.readback_timeout
            )));
        }
        Ok(())
    }

    fn run_stack(&mut self, mode: Mode, x: &[f32], n: usize) -> Result<Vec<f32>> {
        let caps = self.config.selector_caps();
        let mut current = x.to_vec();
        for i in 0..self.manifest.num_layers {
            let block = LayerBlock::new(i, &self.manifest, &self.weights, caps);
            current = block.run(mode, &current, n, &mut self.kv)?;
        }
        self.profiler.record_submit(match mode {
            Mode::Prefill => Scope::Prefill,
            Mode::Decode => Scope::Decode,
        });
        Ok(current)
    }

    /// Stand-in for the GPU logits readback of spec §5: the host
    /// norm+matmul that produces the final logits vector. Timed against
    /// `readback_timeout` and poisons the pipeline on overrun.
    fn final_logits(&mut self, hidden_last: &[f32]) -> Result<Vec<f32>> {
        let started = Instant::now();
        let result = self.final_logits_inner(hidden_last);
        self.check_readback_timeout(started.elapsed(), "logits readback")?;
        result
    }

    fn final_logits_inner(&self, hidden_last: &[f32]) -> Result<Vec<f32>> {
        let h = self.manifest.hidden_size;
        let norm = self.weights.require("output_norm.weight")?.as_f32()?;
        let mut normed = vec![0f32; h];
        let plus_one = self.weights.norm_convention == crate::manifest::NormConvention::PlusOne;
        rmsnorm(hidden_last, norm, h, self.manifest.rms_norm_eps, plus_one, &mut normed);

        let lm_head_name = if self.manifest.tied_embeddings {
            "token_embd.weight"
        } else {
            "lm_head.weight"
        };
        let lm_head = self.weights.require(lm_head_name)?;
        let (logits, _variant) = matmul_dispatched(
            &normed,
            1,
            h,
            &lm_head.as_matmul_b()?,
            self.manifest.vocab_size,
            true,
            None,
            self.config.selector_caps(),
        )?;
        Ok(logits)
    }

    fn sample(&self, logits: &[f32], opts: &SamplingOptions, rng: &mut ChaCha8Rng) -> u32 {
        if opts.temperature < 1e-2 {
            return sampler::greedy(logits);
        }
        let scaled = sampler::temperature(logits, opts.temperature);
        if opts.top_k > 0 {
            sampler::top_k(&scaled, opts.top_k, rng)
        } else if opts.top_p < 1.0 {
            sampler::top_p(&scaled, opts.top_p, rng)
        } else {
            sampler::top_k(&scaled, 0, rng)
        }
    }

    fn prefill(&mut self, prompt_ids: &[u32]) -> Result<Vec<f32>> {
        self.ensure_not_poisoned()?;
        self.state = PipelineState::Prefill;
        let table = embedding_table(&self.weights, self.manifest.hidden_size)?;
        let x = gather(&table, prompt_ids, self.manifest.scale_embeddings)?;
        let n = prompt_ids.len();
        let hidden = self.run_stack(Mode::Prefill, &x, n)?;
        let h = self.manifest.hidden_size;
        let last_row = hidden[(n - 1) * h..n * h].to_vec();
        self.final_logits(&last_row)
    }

    fn decode_one(&mut self, prev_token: u32) -> Result<Vec<f32>> {
        self.ensure_not_poisoned()?;
        self.state = PipelineState::Decoding;
        let table = embedding_table(&self.weights, self.manifest.hidden_size)?;
        let x = gather(&table, &[prev_token], self.manifest.scale_embeddings)?;
        let hidden = self.run_stack(Mode::Decode, &x, 1)?;
        self.final_logits(&hidden)
    }

    /// Run a prefill pass and return the raw logits for the final prompt
    /// position, bypassing sampling. Exposed for callers that implement
    /// their own logit processors (guided decoding, custom samplers) and
    /// for cross-checking numerical properties against `decode_logits`.
    pub fn prefill_logits(&mut self, prompt_ids: &[u32]) -> Result<Vec<f32>> {
        self.prefill(prompt_ids)
    }

    /// Run one decode step from `prev_token` and return its raw logits,
    /// bypassing sampling. See [`Pipeline::prefill_logits`].
    pub fn decode_logits(&mut self, prev_token: u32) -> Result<Vec<f32>> {
        self.decode_one(prev_token)
    }

    /// Generate up to `opts.max_tokens` tokens from `prompt_ids`. Yields
    /// one token at a time; honors `cancel` between tokens (never
    /// mid-token, per spec §5).
    pub fn generate(
        mut self,
        prompt_ids: Vec<u32>,
        opts: SamplingOptions,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Stream<Item = Result<GeneratedToken>> + Send>>
    where
        Self: Send + 'static,
    {
        let request_id = uuid::Uuid::new_v4();
        Box::pin(try_stream! {
            opts.validate()?;
            info!(%request_id, prompt_len = prompt_ids.len(), max_tokens = opts.max_tokens, "generation started");
            let mut rng = sampler::rng_from_seed(opts.seed);

            let logits = self.prefill(&prompt_ids)?;
            let mut position = prompt_ids.len();
            let mut token = self.sample(&logits, &opts, &mut rng);
            let stop = if opts.stop_token_ids.contains(&token) {
                Some(StopReason::StopToken)
            } else {
                None
            };
            yield GeneratedToken { token_id: token, position, stop };
            if stop.is_some() {
                self.state = PipelineState::Stopped;
                return;
            }

            let mut emitted = 1u32;
            loop {
                if cancel.is_cancelled() {
                    self.state = PipelineState::Stopped;
                    yield GeneratedToken { token_id: token, position, stop: Some(StopReason::Cancelled) };
                    return;
                }
                if emitted >= opts.max_tokens {
                    self.state = PipelineState::Stopped;
                    return;
                }

                let logits = self.decode_one(token)?;
                position += 1;
                token = self.sample(&logits, &opts, &mut rng);
                emitted += 1;

                let stop = if opts.stop_token_ids.contains(&token) {
                    Some(StopReason::StopToken)
                } else {
                    None
                };
                yield GeneratedToken { token_id: token, position, stop };
                if stop.is_some() {
                    self.state = PipelineState::Stopped;
                    return;
                }
            }
        })
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("state", &self.state)
            .field("num_layers", &self.manifest.num_layers)
            .finish()
    }
}

pub fn log_pipeline_ready(manifest: &Manifest) {
    info!(
        layers = manifest.num_layers,
        hidden = manifest.hidden_size,
        vocab = manifest.vocab_size,
        "pipeline ready"
    );
}

//! One transformer layer (spec §4.6): norm, QKV, RoPE, attention, output
//! projection, FFN, residuals, all behind a single `run` entry point.
//!
//! Tensor names follow a fixed per-layer convention so the weight loader
//! and this module agree without a side-channel lookup table:
//! `layers.{i}.attn_norm.weight`, `layers.{i}.attn_q[.bias]`,
//! `layers.{i}.attn_k[.bias]`, `layers.{i}.attn_v[.bias]`,
//! `layers.{i}.attn_output.weight`, optional `layers.{i}.attn_q_norm.weight`
//! / `attn_k_norm.weight`, `layers.{i}.ffn_norm.weight`,
//! `layers.{i}.ffn_gate.weight` / `ffn_up.weight` / `ffn_down.weight`, and,
//! for sandwich-norm architectures, `layers.{i}.post_attn_norm.weight` /
//! `post_ffn_norm.weight`.

use crate::dispatch::SelectorCaps;
use crate::kernels::attention::attention;
use crate::kernels::matmul::matmul_dispatched;
use crate::kernels::rmsnorm::rmsnorm;
use crate::kernels::rope::apply_rope;
use crate::kernels::ffn::silu_ffn;
use crate::kernels::residual::residual_add;
use crate::kv_cache::KvCache;
use crate::manifest::{Manifest, NormConvention, RopeLayout};
use crate::utils::error::Result;
use crate::weights::Weights;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Prefill,
    Decode,
}

/// One logical layer index's compute, bound to the manifest's shape
/// parameters and this layer's RoPE/window flavor.
pub struct LayerBlock<'w> {
    index: usize,
    hidden_size: usize,
    heads_q: usize,
    heads_kv: usize,
    head_dim: usize,
    intermediate_size: usize,
    eps: f32,
    plus_one: bool,
    theta: f32,
    rope_layout: RopeLayout,
    is_local: bool,
    window: Option<usize>,
    sandwich_norm: bool,
    weights: &'w Weights,
    caps: SelectorCaps,
}

impl<'w> LayerBlock<'w> {
    pub fn new(index: usize, manifest: &Manifest, weights: &'w Weights, caps: SelectorCaps) -> Self {
        Self {
            index,
            hidden_size: manifest.hidden_size,
            heads_q: manifest.num_attention_heads,
            heads_kv: manifest.num_kv_heads,
            head_dim: manifest.head_dim,
            intermediate_size: manifest.intermediate_size,
            eps: manifest.rms_norm_eps,
            plus_one: weights.norm_convention == NormConvention::PlusOne,
            theta: manifest.rope_theta_for_layer(index),
            rope_layout: manifest.rope_layout,
            is_local: manifest.is_local_layer(index),
            window: manifest.sliding_window_size,
            sandwich_norm: manifest.sandwich_norm,
            weights,
            caps,
        }
    }

    fn tensor(&self, suffix: &str) -> String {
        format!("layers.{}.{suffix}", self.index)
    }

    fn optional_bias(&self, suffix: &str) -> Result<Option<&[f32]>> {
        match self.weights.get(&self.tensor(suffix)) {
            Some(t) => Ok(Some(t.as_f32()?)),
            None => Ok(None),
        }
    }

    /// Run this layer over `n` tokens' hidden state `x_in` (`(n,
    /// hidden_size)`), writing the output hidden state and advancing `kv`
    /// in place. `positions` is implied by `kv`'s current `used` for this
    /// layer, matching spec §4.6 step 4's `start = kv.used`.
    pub fn run(&self, mode: Mode, x_in: &[f32], n: usize, kv: &mut KvCache) -> Result<Vec<f32>> {
        let h_size = self.hidden_size;
        let qkv_q = self.heads_q * self.head_dim;
        let qkv_kv = self.heads_kv * self.head_dim;

        // 1. pre-attention norm
        let input_ln = self.weights.require(&self.tensor("attn_norm.weight"))?.as_f32()?;
        let mut h = vec![0f32; n * h_size];
        rmsnorm(x_in, input_ln, h_size, self.eps, self.plus_one, &mut h);

        // 2. QKV projections
        let wq = self.weights.require(&self.tensor("attn_q.weight"))?;
        let wk = self.weights.require(&self.tensor("attn_k.weight"))?;
        let wv = self.weights.require(&self.tensor("attn_v.weight"))?;
        let bq = self.optional_bias("attn_q.bias")?;
        let bk = self.optional_bias("attn_k.bias")?;
        let bv = self.optional_bias("attn_v.bias")?;

        let (mut q, _) = matmul_dispatched(&h, n, h_size, &wq.as_matmul_b()?, qkv_q, true, bq, self.caps)?;
        let (mut k_new, _) = matmul_dispatched(&h, n, h_size, &wk.as_matmul_b()?, qkv_kv, true, bk, self.caps)?;
        let (v_new, _) = matmul_dispatched(&h, n, h_size, &wv.as_matmul_b()?, qkv_kv, true, bv, self.caps)?;

        // 3. optional pre-RoPE per-head Q/K norm, always standard convention
        if let Some(qn) = self.weights.get(&self.tensor("attn_q_norm.weight")) {
            let w = qn.as_f32()?;
            let mut normed = vec![0f32; q.len()];
            rmsnorm(&q, w, self.head_dim, self.eps, false, &mut normed);
            q = normed;
        }
        if let Some(kn) = self.weights.get(&self.tensor("attn_k_norm.weight")) {
            let w = kn.as_f32()?;
            let mut normed = vec![0f32; k_new.len()];
            rmsnorm(&k_new, w, self.head_dim, self.eps, false, &mut normed);
            k_new = normed;
        }

        // 4. RoPE, start position is this layer's KV length before append
        let q_start = kv.used(self.index);
        apply_rope(&mut q, n, self.heads_q, self.head_dim, q_start as u32, self.theta, self.rope_layout);
        apply_rope(&mut k_new, n, self.heads_kv, self.head_dim, q_start as u32, self.theta, self.rope_layout);

        // 5. append to cache
        kv.append(self.index, &k_new, &v_new, n)?;

        // 6. attention
        let view = kv.view(self.index, self.is_local);
        let window = if self.is_local { self.window } else { None };
        let attn_out = match mode {
            Mode::Prefill | Mode::Decode => attention(
                &q,
                n,
                view.k,
                view.v,
                view.used,
                self.heads_q,
                self.heads_kv,
                self.head_dim,
                q_start,
                window,
            ),
        };

        // 7. output projection
        let wo = self.weights.require(&self.tensor("attn_output.weight"))?;
        let bo = self.optional_bias("attn_output.bias")?;
        let (attn_proj, _) = matmul_dispatched(&attn_out, n, qkv_q, &wo.as_matmul_b()?, h_size, true, bo, self.caps)?;

        // 8. residual
        let mut x_mid = vec![0f32; n * h_size];
        residual_add(x_in, &attn_proj, &mut x_mid);
        if self.sandwich_norm {
            if let Some(post_attn) = self.weights.get(&self.tensor("post_attn_norm.weight")) {
                let w = post_attn.as_f32()?;
                let mut normed = vec![0f32; x_mid.len()];
                rmsnorm(&x_mid, w, h_size, self.eps, self.plus_one, &mut normed);
                x_mid = normed;
            }
        }

        // 9. post-attention norm
        let ffn_norm = self.weights.require(&self.tensor("ffn_norm.weight"))?.as_f32()?;
        let mut h2 = vec![0f32; n * h_size];
        rmsnorm(&x_mid, ffn_norm, h_size, self.eps, self.plus_one, &mut h2);

        // 10. FFN
        let gate = self.weights.require(&self.tensor("ffn_gate.weight"))?;
        let up = self.weights.require(&self.tensor("ffn_up.weight"))?;
        let down = self.weights.require(&self.tensor("ffn_down.weight"))?;
        let ffn_out = silu_ffn(
            &h2,
            n,
            h_size,
            self.intermediate_size,
            &gate.as_matmul_b()?,
            &up.as_matmul_b()?,
            &down.as_matmul_b()?,
            self.caps,
        )?;

        // 11. residual
        let mut x_out = vec![0f32; n * h_size];
        residual_add(&x_mid, &ffn_out, &mut x_out);
        if self.sandwich_norm {
            if let Some(post_ffn) = self.weights.get(&self.tensor("post_ffn_norm.weight")) {
                let w = post_ffn.as_f32()?;
                let mut normed = vec![0f32; x_out.len()];
                rmsnorm(&x_out, w, h_size, self.eps, self.plus_one, &mut normed);
                x_out = normed;
            }
        }

        Ok(x_out)
    }
}

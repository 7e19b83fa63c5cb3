//! Shared toy-model construction for integration tests. Builds a tiny
//! manifest and a fully in-memory weight set (no real GPU, no real shard
//! storage) so cross-module properties from spec §8 can be exercised
//! end-to-end through `Pipeline` without any model file on disk.
//!
//! Not every test binary that includes this module uses every helper.

#![allow(dead_code)]

use doppler_core::manifest::{DType, Manifest, NormConvention, RopeLayout, TensorDesc};
use doppler_core::shard::MemoryShardReader;
use doppler_core::weights::WeightLoader;
use doppler_core::Weights;

pub fn identity_bytes(n: usize) -> Vec<u8> {
    let mut m = vec![0f32; n * n];
    for i in 0..n {
        m[i * n + i] = 1.0;
    }
    bytemuck::cast_slice(&m).to_vec()
}

pub fn ones_bytes(n: usize) -> Vec<u8> {
    bytemuck::cast_slice(&vec![1f32; n]).to_vec()
}

pub fn scaled_identity_bytes(n: usize, scale: f32) -> Vec<u8> {
    let mut m = vec![0f32; n * n];
    for i in 0..n {
        m[i * n + i] = scale;
    }
    bytemuck::cast_slice(&m).to_vec()
}

pub fn embedding_bytes(vocab: usize, hidden: usize) -> Vec<u8> {
    let mut m = vec![0f32; vocab * hidden];
    for t in 0..vocab {
        for h in 0..hidden {
            // Distinct, bounded values per (token, dim) so gather output is
            // checkable and attention over distinct tokens is distinguishable.
            m[t * hidden + h] = ((t * 17 + h * 5) % 11) as f32 * 0.05 - 0.25;
        }
    }
    bytemuck::cast_slice(&m).to_vec()
}

/// A 2-layer toy manifest: layer 0 global (`rope_theta_global`), layer 1
/// local (`rope_theta_local`) under a `sliding_window_pattern` of 2.
pub fn toy_manifest(vocab: usize, hidden: usize, heads: usize, head_dim: usize, layers: usize) -> Manifest {
    Manifest {
        vocab_size: vocab,
        hidden_size: hidden,
        num_layers: layers,
        num_attention_heads: heads,
        num_kv_heads: heads,
        head_dim,
        intermediate_size: hidden,
        rms_norm_eps: 1e-5,
        rope_theta_global: 1_000_000.0,
        rope_theta_local: Some(10_000.0),
        sliding_window_pattern: Some(2),
        rope_layout: RopeLayout::Split,
        max_position: 128,
        sliding_window_size: Some(8),
        rms_norm_weight_offset: NormConvention::Standard,
        scale_embeddings: false,
        sandwich_norm: false,
        tied_embeddings: true,
        tensors: vec![],
    }
}

/// Realize identity-ish weights (Q/K/V/O/down = identity, gate/up = small
/// scaled identity so the FFN contributes a nonzero, checkable term) for a
/// manifest built by [`toy_manifest`].
pub fn build_toy_weights(manifest: &mut Manifest) -> Weights {
    let h = manifest.hidden_size;
    let v = manifest.vocab_size;

    let mut named: Vec<(String, Vec<u8>)> = vec![
        ("token_embd.weight".into(), embedding_bytes(v, h)),
        ("output_norm.weight".into(), ones_bytes(h)),
    ];
    for i in 0..manifest.num_layers {
        named.push((format!("layers.{i}.attn_norm.weight"), ones_bytes(h)));
        named.push((format!("layers.{i}.attn_q.weight"), identity_bytes(h)));
        named.push((format!("layers.{i}.attn_k.weight"), identity_bytes(h)));
        named.push((format!("layers.{i}.attn_v.weight"), identity_bytes(h)));
        named.push((format!("layers.{i}.attn_output.weight"), identity_bytes(h)));
        named.push((format!("layers.{i}.ffn_norm.weight"), ones_bytes(h)));
        named.push((format!("layers.{i}.ffn_gate.weight"), scaled_identity_bytes(h, 0.1)));
        named.push((format!("layers.{i}.ffn_up.weight"), scaled_identity_bytes(h, 0.1)));
        named.push((format!("layers.{i}.ffn_down.weight"), identity_bytes(h)));
    }

    let mut reader = MemoryShardReader::new();
    let mut descs = Vec::with_capacity(named.len());
    for (name, bytes) in named {
        let shape = if name.ends_with("norm.weight") {
            vec![h]
        } else if name == "token_embd.weight" {
            vec![v, h]
        } else {
            vec![h, h]
        };
        descs.push(TensorDesc {
            name: name.clone(),
            dtype: DType::F32,
            shape,
            shard_id: name.clone(),
            byte_offset: 0,
            byte_length: bytes.len() as u64,
        });
        reader = reader.with_shard(name, bytes);
    }

    manifest.tensors = descs;
    WeightLoader::new(manifest, &reader, false)
        .load(true)
        .expect("toy weights must load")
}

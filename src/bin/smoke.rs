//! Smoke test binary: acquires a GPU device, exercises the buffer pool,
//! builds a tiny in-memory manifest + weight set, and runs one prefill
//! plus a few decode steps through the CPU-reference pipeline.
//!
//! Usage: cargo run --bin doppler-smoke

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use doppler_core::gpu::{BufferPool, Device};
use doppler_core::manifest::{DType, Manifest, NormConvention, RopeLayout, TensorDesc};
use doppler_core::shard::MemoryShardReader;
use doppler_core::weights::WeightLoader;
use doppler_core::{EngineConfig, Pipeline, SamplingOptions};

fn identity_bytes(n: usize) -> Vec<u8> {
    let mut m = vec![0f32; n * n];
    for i in 0..n {
        m[i * n + i] = 1.0;
    }
    bytemuck::cast_slice(&m).to_vec()
}

fn ones_bytes(n: usize) -> Vec<u8> {
    bytemuck::cast_slice(&vec![1f32; n]).to_vec()
}

fn embedding_bytes(vocab: usize, hidden: usize) -> Vec<u8> {
    let mut m = vec![0f32; vocab * hidden];
    for t in 0..vocab {
        for h in 0..hidden {
            m[t * hidden + h] = ((t * 31 + h) % 7) as f32 * 0.1;
        }
    }
    bytemuck::cast_slice(&m).to_vec()
}

fn toy_manifest() -> Manifest {
    let hidden = 8;
    Manifest {
        vocab_size: 16,
        hidden_size: hidden,
        num_layers: 2,
        num_attention_heads: 2,
        num_kv_heads: 2,
        head_dim: 4,
        intermediate_size: hidden,
        rms_norm_eps: 1e-5,
        rope_theta_global: 10000.0,
        rope_theta_local: None,
        sliding_window_pattern: None,
        rope_layout: RopeLayout::Split,
        max_position: 64,
        sliding_window_size: None,
        rms_norm_weight_offset: NormConvention::Standard,
        scale_embeddings: false,
        sandwich_norm: false,
        tied_embeddings: true,
        tensors: vec![],
    }
}

fn build_toy_weights(manifest: &mut Manifest) -> doppler_core::Weights {
    let h = manifest.hidden_size;
    let v = manifest.vocab_size;

    let mut named: Vec<(String, Vec<usize>, Vec<u8>)> = vec![
        ("token_embd.weight".into(), vec![v, h], embedding_bytes(v, h)),
        ("output_norm.weight".into(), vec![h], ones_bytes(h)),
    ];
    for i in 0..manifest.num_layers {
        named.push((format!("layers.{i}.attn_norm.weight"), vec![h], ones_bytes(h)));
        named.push((format!("layers.{i}.attn_q.weight"), vec![h, h], identity_bytes(h)));
        named.push((format!("layers.{i}.attn_k.weight"), vec![h, h], identity_bytes(h)));
        named.push((format!("layers.{i}.attn_v.weight"), vec![h, h], identity_bytes(h)));
        named.push((format!("layers.{i}.attn_output.weight"), vec![h, h], identity_bytes(h)));
        named.push((format!("layers.{i}.ffn_norm.weight"), vec![h], ones_bytes(h)));
        named.push((format!("layers.{i}.ffn_gate.weight"), vec![h, h], identity_bytes(h)));
        named.push((format!("layers.{i}.ffn_up.weight"), vec![h, h], identity_bytes(h)));
        named.push((format!("layers.{i}.ffn_down.weight"), vec![h, h], identity_bytes(h)));
    }

    let mut reader = MemoryShardReader::new();
    let mut descs = Vec::with_capacity(named.len());
    for (name, shape, bytes) in named.drain(..) {
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
    let loader = WeightLoader::new(manifest, &reader, false);
    loader.load(true).expect("toy weights must load")
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    doppler_core::init_tracing();

    let device = match Device::acquire(false) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("no GPU adapter available ({e}); smoke test needs a wgpu-compatible device");
            std::process::exit(1);
        }
    };
    println!("acquired device: {}", device.adapter_name());
    println!("features: {:?}", device.features);

    let config = EngineConfig::default();

    // Exercise the buffer pool against the acquired device, independent of
    // the CPU-reference pipeline run below (GPU kernel dispatch for the
    // layer stack is not wired up yet; see DESIGN.md).
    let pool = BufferPool::new(device.device_arc(), config.pool_soft_cap_bytes as u64);
    let probe = pool.alloc(4096, doppler_core::BufferUsage::StorageRW);
    pool.release(probe);
    println!("pool stats after one alloc/release cycle: {:?}", pool.stats());

    let mut manifest = toy_manifest();
    let weights = build_toy_weights(&mut manifest);

    let pipeline = Pipeline::new(manifest, weights, config).expect("toy manifest must validate");

    let opts = SamplingOptions {
        max_tokens: 5,
        temperature: 0.0,
        top_k: 0,
        top_p: 1.0,
        stop_token_ids: vec![],
        seed: Some(1),
    };

    let mut stream = pipeline.generate(vec![1, 2, 3], opts, CancellationToken::new());
    print!("generated tokens: ");
    while let Some(step) = stream.next().await {
        match step {
            Ok(tok) => print!("{} ", tok.token_id),
            Err(e) => {
                eprintln!("\ngeneration failed: {e}");
                std::process::exit(1);
            }
        }
    }
    println!();
}

//! Benchmarks for the kernel library's CPU reference paths: the dense
//! matmul used for QKV/output/FFN projections, the Q4_K fused
//! dequant+matmul, and RMSNorm. These are the numeric contracts a GPU
//! dispatch variant must reproduce; benchmarking the reference keeps a
//! baseline for judging whether a future GPU path is worth its overhead
//! at a given matrix size.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use doppler_core::kernels::matmul::{matmul, MatmulB};
use doppler_core::kernels::rmsnorm::rmsnorm;
use doppler_core::quant::q4k::{Q4KBlock, BLOCK_ELEMENTS};

fn dense_operands(m: usize, k: usize, n: usize) -> (Vec<f32>, Vec<f32>) {
    let a: Vec<f32> = (0..m * k).map(|i| (i % 13) as f32 * 0.01 - 0.06).collect();
    let b: Vec<f32> = (0..n * k).map(|i| (i % 17) as f32 * 0.01 - 0.08).collect();
    (a, b)
}

fn bench_matmul_dense(c: &mut Criterion) {
    let mut group = c.benchmark_group("matmul_dense_f32");
    for &hidden in &[256usize, 1024] {
        let (a, b) = dense_operands(8, hidden, hidden);
        group.bench_with_input(BenchmarkId::from_parameter(hidden), &hidden, |bencher, _| {
            bencher.iter(|| {
                matmul(black_box(&a), 8, hidden, &MatmulB::F32(&b), hidden, true, None).unwrap()
            });
        });
    }
    group.finish();
}

fn bench_matmul_q4k(c: &mut Criterion) {
    let k = BLOCK_ELEMENTS * 4; // 1024, 4 blocks per row
    let n = 256;
    let m = 8;

    let a: Vec<f32> = (0..m * k).map(|i| (i % 13) as f32 * 0.01 - 0.06).collect();
    let mut blocks = Vec::with_capacity(n * (k / BLOCK_ELEMENTS) * 144);
    for row in 0..n {
        for blk in 0..k / BLOCK_ELEMENTS {
            let mut vals = [0f32; BLOCK_ELEMENTS];
            for (i, v) in vals.iter_mut().enumerate() {
                *v = ((row * 7 + blk * 3 + i) % 31) as f32 * 0.02 - 0.3;
            }
            blocks.extend_from_slice(&Q4KBlock::quantize(&vals).to_bytes());
        }
    }

    c.bench_function("matmul_q4k_fused_1024x256", |bencher| {
        bencher.iter(|| matmul(black_box(&a), m, k, &MatmulB::Q4K(&blocks), n, true, None).unwrap());
    });
}

fn bench_rmsnorm(c: &mut Criterion) {
    let hidden = 4096;
    let rows = 16;
    let x: Vec<f32> = (0..rows * hidden).map(|i| (i % 23) as f32 * 0.01 - 0.1).collect();
    let w = vec![1.0f32; hidden];
    let mut out = vec![0f32; rows * hidden];

    c.bench_function("rmsnorm_4096x16", |bencher| {
        bencher.iter(|| rmsnorm(black_box(&x), &w, hidden, 1e-5, false, &mut out));
    });
}

criterion_group!(benches, bench_matmul_dense, bench_matmul_q4k, bench_rmsnorm);
criterion_main!(benches);

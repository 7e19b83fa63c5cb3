//! Matmul kernel family (spec §4.2.3).
//!
//! `A` is always a dense f32 `(M, K)` activation matrix. `B` carries the
//! operand dtype; the Q4_K variant dequantizes each block on the fly
//! instead of materializing a dense `f32` copy of `B`, matching the
//! "must not materialize a dense intermediate" contract.

use half::f16;

use crate::dispatch::{select_matmul_variant, MatmulShape, MatmulVariant, SelectorCaps};
use crate::manifest::DType;
use crate::quant::q4k::{Q4KBlock, BLOCK_ELEMENTS, BLOCK_BYTES};
use crate::utils::error::{DopplerError, Result};

/// Right-hand operand of a matmul, tagged by storage dtype. Logical shape
/// is always `(k, n)` (or `(n, k)` when `transpose_b` is set at the call
/// site) regardless of encoding.
pub enum MatmulB<'a> {
    F32(&'a [f32]),
    F16(&'a [f16]),
    Q4K(&'a [u8]),
}

fn check_shape(a_cols: usize, b_rows: usize) -> Result<()> {
    if a_cols != b_rows {
        return Err(DopplerError::ShapeMismatch(format!(
            "matmul inner dimension mismatch: A has {a_cols} columns, B has {b_rows} rows"
        )));
    }
    Ok(())
}

/// `C = A * B` (or `A * Bᵀ` if `transpose_b`), accumulated in f32.
///
/// `a` is `(m, k)` row-major. `b` is logically `(k, n)` row-major, or
/// `(n, k)` row-major when `transpose_b` is set (the common case for
/// weight matrices stored `(out_features, in_features)`). `bias`, if
/// present, has length `n` and is added to every row.
pub fn matmul(
    a: &[f32],
    m: usize,
    k: usize,
    b: &MatmulB,
    n: usize,
    transpose_b: bool,
    bias: Option<&[f32]>,
) -> Result<Vec<f32>> {
    debug_assert_eq!(a.len(), m * k);
    if let Some(bias) = bias {
        debug_assert_eq!(bias.len(), n);
    }

    match b {
        MatmulB::F32(data) => {
            let b_rows = if transpose_b { n } else { k };
            let b_cols = if transpose_b { k } else { n };
            check_shape(k, b_rows)?;
            debug_assert_eq!(data.len(), b_rows * b_cols);
            Ok(matmul_dense(a, m, k, data, n, transpose_b, bias))
        }
        MatmulB::F16(data) => {
            let b_rows = if transpose_b { n } else { k };
            check_shape(k, b_rows)?;
            let widened: Vec<f32> = data.iter().map(|v| v.to_f32()).collect();
            Ok(matmul_dense(a, m, k, &widened, n, transpose_b, bias))
        }
        MatmulB::Q4K(blocks) => {
            // Q4_K weights are always stored (out_features, in_features),
            // i.e. the transpose_b layout; in_features must tile evenly.
            if k % BLOCK_ELEMENTS != 0 {
                return Err(DopplerError::ShapeMismatch(format!(
                    "Q4_K matmul inner dimension {k} is not a multiple of block size {BLOCK_ELEMENTS}"
                )));
            }
            Ok(matmul_q4k(a, m, k, blocks, n, bias))
        }
    }
}

/// Selector-routed matmul (spec §4.3): resolves which kernel variant this
/// call should use, actually executes that variant rather than always
/// taking the fused path, and hands the resolved variant back so a caller
/// can record it. This is the entry point `layer`/`pipeline` call for
/// every weight-matrix projection; plain [`matmul`] remains the primitive
/// each variant is built from.
pub fn matmul_dispatched(
    a: &[f32],
    m: usize,
    k: usize,
    b: &MatmulB,
    n: usize,
    transpose_b: bool,
    bias: Option<&[f32]>,
    caps: SelectorCaps,
) -> Result<(Vec<f32>, MatmulVariant)> {
    let b_dtype = match b {
        MatmulB::F32(_) => DType::F32,
        MatmulB::F16(_) => DType::F16,
        MatmulB::Q4K(_) => DType::Q4K,
    };
    let variant = select_matmul_variant(MatmulShape { b_dtype, m, n, k }, caps);

    let out = match (variant, b) {
        (MatmulVariant::DequantThenF16Matmul, MatmulB::Q4K(blocks)) => {
            dequant_then_f16_matmul(a, m, k, blocks, n, bias)?
        }
        _ => matmul(a, m, k, b, n, transpose_b, bias)?,
    };
    Ok((out, variant))
}

/// Rule-2 fallback for Q4_K operands when no fused dequant+matmul kernel is
/// registered (`caps.has_fused_q4k_matmul == false`): widen every block to
/// a dense f16 weight matrix up front, then run the ordinary dense path.
/// Unlike [`matmul_q4k`]'s fused path, this does materialize the full
/// dequantized matrix — that's the whole point of the fallback name.
fn dequant_then_f16_matmul(a: &[f32], m: usize, k: usize, blocks: &[u8], n: usize, bias: Option<&[f32]>) -> Result<Vec<f32>> {
    if k % BLOCK_ELEMENTS != 0 {
        return Err(DopplerError::ShapeMismatch(format!(
            "Q4_K matmul inner dimension {k} is not a multiple of block size {BLOCK_ELEMENTS}"
        )));
    }
    let blocks_per_row = k / BLOCK_ELEMENTS;
    let row_bytes = blocks_per_row * BLOCK_BYTES;
    debug_assert_eq!(blocks.len(), row_bytes * n);

    let mut dense = vec![f16::from_f32(0.0); n * k];
    for row in 0..n {
        let row_start = row * row_bytes;
        for blk in 0..blocks_per_row {
            let block_bytes = &blocks[row_start + blk * BLOCK_BYTES..row_start + (blk + 1) * BLOCK_BYTES];
            let values = Q4KBlock::from_bytes(block_bytes).dequantize();
            for (i, v) in values.iter().enumerate() {
                dense[row * k + blk * BLOCK_ELEMENTS + i] = f16::from_f32(*v);
            }
        }
    }
    matmul(a, m, k, &MatmulB::F16(&dense), n, true, bias)
}

fn matmul_dense(
    a: &[f32],
    m: usize,
    k: usize,
    b: &[f32],
    n: usize,
    transpose_b: bool,
    bias: Option<&[f32]>,
) -> Vec<f32> {
    let mut out = vec![0f32; m * n];
    for row in 0..m {
        let a_row = &a[row * k..(row + 1) * k];
        for col in 0..n {
            let mut acc = 0f32;
            if transpose_b {
                let b_row = &b[col * k..(col + 1) * k];
                for i in 0..k {
                    acc += a_row[i] * b_row[i];
                }
            } else {
                for i in 0..k {
                    acc += a_row[i] * b[i * n + col];
                }
            }
            out[row * n + col] = acc + bias.map(|b| b[col]).unwrap_or(0.0);
        }
    }
    out
}

/// Fused dequant+matmul for a `(n, k)` Q4_K weight matrix (`transpose_b`
/// layout only — weights are always stored `(out_features, in_features)`
/// in this format). Each output row reuses the same dequantized weight
/// row across every input row, so a weight row is decoded at most once
/// per call regardless of `m`.
fn matmul_q4k(a: &[f32], m: usize, k: usize, blocks: &[u8], n: usize, bias: Option<&[f32]>) -> Vec<f32> {
    let blocks_per_row = k / BLOCK_ELEMENTS;
    let row_bytes = blocks_per_row * BLOCK_BYTES;
    debug_assert_eq!(blocks.len(), row_bytes * n);

    let mut out = vec![0f32; m * n];
    let mut weight_row = vec![0f32; k];

    for col in 0..n {
        let row_start = col * row_bytes;
        for b in 0..blocks_per_row {
            let block_bytes = &blocks[row_start + b * BLOCK_BYTES..row_start + (b + 1) * BLOCK_BYTES];
            let values = Q4KBlock::from_bytes(block_bytes).dequantize();
            weight_row[b * BLOCK_ELEMENTS..(b + 1) * BLOCK_ELEMENTS].copy_from_slice(&values);
        }

        let bias_val = bias.map(|b| b[col]).unwrap_or(0.0);
        for row in 0..m {
            let a_row = &a[row * k..(row + 1) * k];
            let mut acc = 0f32;
            for i in 0..k {
                acc += a_row[i] * weight_row[i];
            }
            out[row * n + col] = acc + bias_val;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quant::q4k::Q4KBlock;

    #[test]
    fn identity_matmul_returns_input() {
        // A (2x2) * I(2x2)
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let identity = vec![1.0, 0.0, 0.0, 1.0];
        let out = matmul(&a, 2, 2, &MatmulB::F32(&identity), 2, false, None).unwrap();
        assert_eq!(out, a);
    }

    #[test]
    fn transpose_b_matches_manual_transpose() {
        let a = vec![1.0, 2.0, 3.0, 4.0]; // (2,2)
        let b_t = vec![5.0, 6.0, 7.0, 8.0]; // (2,2) stored as (n,k)
        let out = matmul(&a, 2, 2, &MatmulB::F32(&b_t), 2, true, None).unwrap();
        // row0 . col0(of logical B) = row0 . b_t_row0
        assert_eq!(out[0], 1.0 * 5.0 + 2.0 * 6.0);
        assert_eq!(out[1], 1.0 * 7.0 + 2.0 * 8.0);
    }

    #[test]
    fn shape_mismatch_is_reported() {
        let a = vec![1.0; 6]; // (2,3)
        let b = vec![1.0; 8]; // (4,2) as (n=4,k=2)
        let err = matmul(&a, 2, 3, &MatmulB::F32(&b), 4, true, None).unwrap_err();
        assert!(matches!(err, DopplerError::ShapeMismatch(_)));
    }

    #[test]
    fn q4k_matmul_close_to_f32_reference() {
        let k = BLOCK_ELEMENTS;
        let n = 2;
        let m = 1;

        let mut rows_f32 = vec![0f32; n * k];
        for row in 0..n {
            for i in 0..k {
                rows_f32[row * k + i] = ((i as f32) - 128.0) * 0.01 * (row as f32 + 1.0);
            }
        }

        let mut q4k_bytes = Vec::with_capacity(n * BLOCK_BYTES);
        for row in 0..n {
            let mut block_vals = [0f32; BLOCK_ELEMENTS];
            block_vals.copy_from_slice(&rows_f32[row * k..(row + 1) * k]);
            let block = Q4KBlock::quantize(&block_vals);
            q4k_bytes.extend_from_slice(&block.to_bytes());
        }

        let a = vec![1.0f32; m * k];
        let f32_out = matmul(&a, m, k, &MatmulB::F32(&rows_f32), n, true, None).unwrap();
        let q4k_out = matmul(&a, m, k, &MatmulB::Q4K(&q4k_bytes), n, true, None).unwrap();

        for (f, q) in f32_out.iter().zip(q4k_out.iter()) {
            let rtol = 0.05 * f.abs().max(1.0);
            assert!((f - q).abs() <= rtol, "f32={f} q4k={q}");
        }
    }

    #[test]
    fn dispatched_q4k_picks_fused_when_registered() {
        let k = BLOCK_ELEMENTS;
        let n = 1;
        let m = 1;
        let block_vals = [0.5f32; BLOCK_ELEMENTS];
        let bytes = Q4KBlock::quantize(&block_vals).to_bytes();
        let a = vec![1.0f32; m * k];

        let caps = SelectorCaps { has_fused_q4k_matmul: true, has_subgroups: false };
        let (_out, variant) =
            matmul_dispatched(&a, m, k, &MatmulB::Q4K(&bytes), n, true, None, caps).unwrap();
        assert_eq!(variant, MatmulVariant::FusedQ4KMatmul);
    }

    #[test]
    fn dispatched_q4k_fallback_matches_fused_numerically() {
        let k = BLOCK_ELEMENTS;
        let n = 2;
        let m = 1;

        let mut rows_f32 = vec![0f32; n * k];
        for row in 0..n {
            for i in 0..k {
                rows_f32[row * k + i] = ((i as f32) - 128.0) * 0.01 * (row as f32 + 1.0);
            }
        }
        let mut bytes = Vec::with_capacity(n * BLOCK_BYTES);
        for row in 0..n {
            let mut block_vals = [0f32; BLOCK_ELEMENTS];
            block_vals.copy_from_slice(&rows_f32[row * k..(row + 1) * k]);
            bytes.extend_from_slice(&Q4KBlock::quantize(&block_vals).to_bytes());
        }
        let a = vec![1.0f32; m * k];

        let fused_caps = SelectorCaps { has_fused_q4k_matmul: true, has_subgroups: false };
        let (fused_out, fused_variant) =
            matmul_dispatched(&a, m, k, &MatmulB::Q4K(&bytes), n, true, None, fused_caps).unwrap();
        assert_eq!(fused_variant, MatmulVariant::FusedQ4KMatmul);

        let fallback_caps = SelectorCaps { has_fused_q4k_matmul: false, has_subgroups: false };
        let (fallback_out, fallback_variant) =
            matmul_dispatched(&a, m, k, &MatmulB::Q4K(&bytes), n, true, None, fallback_caps).unwrap();
        assert_eq!(fallback_variant, MatmulVariant::DequantThenF16Matmul);

        for (f, g) in fused_out.iter().zip(fallback_out.iter()) {
            assert!((f - g).abs() <= 0.02 * f.abs().max(1.0), "fused={f} fallback={g}");
        }
    }

    #[test]
    fn dispatched_dense_gemv_prefers_subgroup_when_available() {
        let a = vec![1.0f32, 2.0];
        let b = vec![1.0, 0.0, 0.0, 1.0];
        let caps = SelectorCaps { has_fused_q4k_matmul: false, has_subgroups: true };
        let (out, variant) = matmul_dispatched(&a, 1, 2, &MatmulB::F32(&b), 2, false, None, caps).unwrap();
        assert_eq!(variant, MatmulVariant::SubgroupGemv);
        assert_eq!(out, a);
    }
}

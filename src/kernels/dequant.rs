//! Standalone Q4_K dequantization, used only for validation and weight
//! inspection paths (spec §4.2.9) — never on the matmul hot path, which
//! fuses dequant into the matmul kernel instead (see `kernels::matmul`).

use crate::quant::q4k::{Q4KBlock, BLOCK_BYTES, BLOCK_ELEMENTS};
use crate::utils::error::{DopplerError, Result};

/// Dequantize a full Q4_K tensor's raw bytes into f32.
pub fn dequantize_tensor(blocks: &[u8], element_count: usize) -> Result<Vec<f32>> {
    if element_count % BLOCK_ELEMENTS != 0 {
        return Err(DopplerError::ShapeMismatch(format!(
            "element count {element_count} is not a multiple of Q4_K block size {BLOCK_ELEMENTS}"
        )));
    }
    let n_blocks = element_count / BLOCK_ELEMENTS;
    if blocks.len() != n_blocks * BLOCK_BYTES {
        return Err(DopplerError::ShapeMismatch(format!(
            "expected {} bytes for {n_blocks} Q4_K blocks, got {}",
            n_blocks * BLOCK_BYTES,
            blocks.len()
        )));
    }

    let mut out = vec![0f32; element_count];
    for b in 0..n_blocks {
        let chunk = &blocks[b * BLOCK_BYTES..(b + 1) * BLOCK_BYTES];
        let values = Q4KBlock::from_bytes(chunk).dequantize();
        out[b * BLOCK_ELEMENTS..(b + 1) * BLOCK_ELEMENTS].copy_from_slice(&values);
    }
    Ok(out)
}

//! Embedding lookup (spec §4.2.1).
//!
//! The embedding table may be stored in any of the dtypes a tensor can
//! carry; `EmbeddingTable` captures that and dequantizes row-by-row so the
//! gather kernel never materializes the full table in f32.

use half::f16;

use crate::quant::q4k::{Q4KBlock, BLOCK_ELEMENTS};
use crate::utils::error::{DopplerError, Result};

/// Borrowed view over an embedding table's raw bytes, tagged by dtype.
pub enum EmbeddingTable<'a> {
    F32 { data: &'a [f32], hidden_size: usize },
    F16 { data: &'a [f16], hidden_size: usize },
    Q4K { blocks: &'a [u8], hidden_size: usize },
}

impl<'a> EmbeddingTable<'a> {
    pub fn hidden_size(&self) -> usize {
        match self {
            EmbeddingTable::F32 { hidden_size, .. } => *hidden_size,
            EmbeddingTable::F16 { hidden_size, .. } => *hidden_size,
            EmbeddingTable::Q4K { hidden_size, .. } => *hidden_size,
        }
    }

    fn vocab_size(&self) -> usize {
        match self {
            EmbeddingTable::F32 { data, hidden_size } => data.len() / hidden_size,
            EmbeddingTable::F16 { data, hidden_size } => data.len() / hidden_size,
            EmbeddingTable::Q4K { blocks, hidden_size } => {
                let row_bytes = (*hidden_size / BLOCK_ELEMENTS) * crate::quant::q4k::BLOCK_BYTES;
                blocks.len() / row_bytes
            }
        }
    }

    /// Copy row `token_id`, dequantized to f32, into `out` (length `hidden_size`).
    fn row_into(&self, token_id: u32, out: &mut [f32]) {
        match self {
            EmbeddingTable::F32 { data, hidden_size } => {
                let start = token_id as usize * hidden_size;
                out.copy_from_slice(&data[start..start + hidden_size]);
            }
            EmbeddingTable::F16 { data, hidden_size } => {
                let start = token_id as usize * hidden_size;
                for (dst, src) in out.iter_mut().zip(&data[start..start + hidden_size]) {
                    *dst = src.to_f32();
                }
            }
            EmbeddingTable::Q4K { blocks, hidden_size } => {
                let blocks_per_row = hidden_size / BLOCK_ELEMENTS;
                let row_bytes = blocks_per_row * crate::quant::q4k::BLOCK_BYTES;
                let row_start = token_id as usize * row_bytes;
                for b in 0..blocks_per_row {
                    let block_bytes =
                        &blocks[row_start + b * crate::quant::q4k::BLOCK_BYTES
                            ..row_start + (b + 1) * crate::quant::q4k::BLOCK_BYTES];
                    let block = Q4KBlock::from_bytes(block_bytes);
                    let values = block.dequantize();
                    out[b * BLOCK_ELEMENTS..(b + 1) * BLOCK_ELEMENTS].copy_from_slice(&values);
                }
            }
        }
    }
}

/// Gather rows `token_ids` from `table` into `(N, H)` f32 output.
///
/// If `scale_embeddings` is set, each row is multiplied by `sqrt(H)` (spec
/// §4.2.1, applied exactly once, never again downstream — see §9).
pub fn gather(
    table: &EmbeddingTable,
    token_ids: &[u32],
    scale_embeddings: bool,
) -> Result<Vec<f32>> {
    let hidden_size = table.hidden_size();
    let vocab_size = table.vocab_size();
    let mut out = vec![0f32; token_ids.len() * hidden_size];

    let scale = if scale_embeddings {
        (hidden_size as f32).sqrt()
    } else {
        1.0
    };

    for (i, &tok) in token_ids.iter().enumerate() {
        if tok as usize >= vocab_size {
            return Err(DopplerError::OutOfRange(format!(
                "token id {tok} out of range for vocab size {vocab_size}"
            )));
        }
        let row = &mut out[i * hidden_size..(i + 1) * hidden_size];
        table.row_into(tok, row);
        if scale_embeddings {
            for v in row.iter_mut() {
                *v *= scale;
            }
        }
    }

    Ok(out)
}

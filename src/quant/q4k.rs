//! Q4_K block format: bit-exact layout per spec §6.1.
//!
//! A 144-byte block packs 256 f32-equivalent values as eight 32-value
//! sub-blocks, each with its own 6-bit scale and 6-bit min, themselves
//! scaled by a per-block fp16 super-scale (`d`) and super-min (`dmin`).

use half::f16;

pub const BLOCK_ELEMENTS: usize = 256;
pub const BLOCK_BYTES: usize = 144;
const SUB_BLOCKS: usize = 8;
const SUB_BLOCK_LEN: usize = 32;

/// A decoded Q4_K block: one scale and one min per 32-value sub-block,
/// plus the raw 4-bit codes for all 256 values.
#[derive(Debug, Clone)]
pub struct Q4KBlock {
    pub d: f32,
    pub dmin: f32,
    pub scale_bits: [u8; SUB_BLOCKS],
    pub min_bits: [u8; SUB_BLOCKS],
    pub nibbles: [u8; BLOCK_ELEMENTS],
}

impl Q4KBlock {
    /// Parse the 6-bit packed scale/min table at bytes 4..16, following
    /// the llama.cpp `get_scale_min_k4` bit layout named in spec §6.1.
    fn unpack_scales(packed: &[u8; 12]) -> ([u8; SUB_BLOCKS], [u8; SUB_BLOCKS]) {
        let mut scale_bits = [0u8; SUB_BLOCKS];
        let mut min_bits = [0u8; SUB_BLOCKS];
        for j in 0..4 {
            scale_bits[j] = packed[j] & 0x3F;
            min_bits[j] = packed[j + 4] & 0x3F;
        }
        for j in 4..8 {
            scale_bits[j] = (packed[j + 4] & 0x0F) | ((packed[j - 4] >> 6) << 4);
            min_bits[j] = (packed[j + 4] >> 4) | ((packed[j] >> 6) << 4);
        }
        (scale_bits, min_bits)
    }

    fn pack_scales(scale_bits: &[u8; SUB_BLOCKS], min_bits: &[u8; SUB_BLOCKS]) -> [u8; 12] {
        let mut packed = [0u8; 12];
        for j in 0..4 {
            packed[j] |= scale_bits[j] & 0x3F;
            packed[j + 4] |= min_bits[j] & 0x3F;
        }
        for j in 4..8 {
            packed[j + 4] |= scale_bits[j] & 0x0F;
            packed[j + 4] |= (min_bits[j] & 0x0F) << 4;
            packed[j - 4] |= (scale_bits[j] >> 4) << 6;
            packed[j] |= (min_bits[j] >> 4) << 6;
        }
        packed
    }

    /// Decode a 144-byte block buffer (bit-exact per spec §6.1).
    pub fn from_bytes(bytes: &[u8]) -> Self {
        debug_assert_eq!(bytes.len(), BLOCK_BYTES);
        let d = f16::from_le_bytes([bytes[0], bytes[1]]).to_f32();
        let dmin = f16::from_le_bytes([bytes[2], bytes[3]]).to_f32();

        let mut packed = [0u8; 12];
        packed.copy_from_slice(&bytes[4..16]);
        let (scale_bits, min_bits) = Self::unpack_scales(&packed);

        let mut nibbles = [0u8; BLOCK_ELEMENTS];
        for chunk in 0..4 {
            let base = 16 + chunk * 32;
            for i in 0..32 {
                let byte = bytes[base + i];
                nibbles[chunk * 64 + i] = byte & 0x0F;
                nibbles[chunk * 64 + 32 + i] = byte >> 4;
            }
        }

        Self {
            d,
            dmin,
            scale_bits,
            min_bits,
            nibbles,
        }
    }

    /// Encode back to the 144-byte wire format.
    pub fn to_bytes(&self) -> [u8; BLOCK_BYTES] {
        let mut out = [0u8; BLOCK_BYTES];
        out[0..2].copy_from_slice(&f16::from_f32(self.d).to_le_bytes());
        out[2..4].copy_from_slice(&f16::from_f32(self.dmin).to_le_bytes());
        out[4..16].copy_from_slice(&Self::pack_scales(&self.scale_bits, &self.min_bits));

        for chunk in 0..4 {
            let base = 16 + chunk * 32;
            for i in 0..32 {
                let lo = self.nibbles[chunk * 64 + i] & 0x0F;
                let hi = self.nibbles[chunk * 64 + 32 + i] & 0x0F;
                out[base + i] = lo | (hi << 4);
            }
        }
        out
    }

    /// Reconstruct the 256 f32 values (spec §3.2 reconstruction formula).
    pub fn dequantize(&self) -> [f32; BLOCK_ELEMENTS] {
        let mut out = [0f32; BLOCK_ELEMENTS];
        for sub in 0..SUB_BLOCKS {
            let scale = self.d * self.scale_bits[sub] as f32;
            let min = self.dmin * self.min_bits[sub] as f32;
            let start = sub * SUB_BLOCK_LEN;
            for i in 0..SUB_BLOCK_LEN {
                out[start + i] = scale * self.nibbles[start + i] as f32 - min;
            }
        }
        out
    }

    /// Quantize 256 f32 values into a Q4_K block.
    ///
    /// Each 32-value sub-block gets its own scale/min fit to its local
    /// range; those are re-quantized to 6 bits against a shared per-block
    /// super-scale/super-min, matching the two-level structure in §3.2.
    pub fn quantize(values: &[f32; BLOCK_ELEMENTS]) -> Self {
        let mut sub_scale = [0f32; SUB_BLOCKS];
        let mut sub_min = [0f32; SUB_BLOCKS];

        for sub in 0..SUB_BLOCKS {
            let slice = &values[sub * SUB_BLOCK_LEN..(sub + 1) * SUB_BLOCK_LEN];
            let bmin = slice.iter().copied().fold(f32::INFINITY, f32::min);
            let bmax = slice.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            sub_scale[sub] = (bmax - bmin) / 15.0;
            sub_min[sub] = -bmin;
        }

        // d is a plain nonnegative range scale, always >= 0. dmin tracks the
        // sign of the sub-block mins (usually negative, but not always if
        // a block's values never cross zero) by taking the extreme value
        // of largest magnitude rather than a plain max.
        let d = sub_scale.iter().copied().fold(0f32, f32::max) / 63.0;
        let dmin = sub_min
            .iter()
            .copied()
            .fold(0f32, |acc, m| if m.abs() > acc.abs() { m } else { acc })
            / 63.0;

        let mut scale_bits = [0u8; SUB_BLOCKS];
        let mut min_bits = [0u8; SUB_BLOCKS];
        for sub in 0..SUB_BLOCKS {
            scale_bits[sub] = if d > 0.0 {
                (sub_scale[sub] / d).round().clamp(0.0, 63.0) as u8
            } else {
                0
            };
            min_bits[sub] = if dmin.abs() > 1e-12 {
                (sub_min[sub] / dmin).round().clamp(0.0, 63.0) as u8
            } else {
                0
            };
        }

        let mut nibbles = [0u8; BLOCK_ELEMENTS];
        for sub in 0..SUB_BLOCKS {
            let scale = d * scale_bits[sub] as f32;
            let min = dmin * min_bits[sub] as f32;
            let start = sub * SUB_BLOCK_LEN;
            for i in 0..SUB_BLOCK_LEN {
                let v = values[start + i];
                let nibble = if scale > 0.0 {
                    ((v + min) / scale).round().clamp(0.0, 15.0) as u8
                } else {
                    0
                };
                nibbles[start + i] = nibble;
            }
        }

        Self {
            d,
            dmin,
            scale_bits,
            min_bits,
            nibbles,
        }
    }
}

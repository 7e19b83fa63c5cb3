//! Shared uniform descriptor layout for kernel dispatch (spec §4.3, §9).
//!
//! Every kernel that needs shape/flag metadata on the GPU side receives it
//! through this single struct rather than an ad hoc per-kernel layout, so
//! there is exactly one field order to keep in sync with the WGSL `struct
//! KernelDims` declaration shared by the kernel source files. `bytemuck`
//! derives give us the byte-for-byte upload without a manual `to_le_bytes`
//! dance, and the struct is `repr(C)` so padding matches `std430` rules
//! (all fields are 4-byte aligned scalars, so there is none).

use bytemuck::{Pod, Zeroable};

/// Uniform buffer layout consumed by every kernel in this crate.
///
/// Field order is load-bearing: this is copied byte-for-byte into a GPU
/// uniform buffer and must match the WGSL-side declaration exactly.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct KernelDims {
    pub rows: u32,
    pub cols: u32,
    pub inner: u32,
    pub heads_q: u32,
    pub heads_kv: u32,
    pub head_dim: u32,
    pub start_pos: u32,
    pub window: u32,
    pub flags: u32,
}

/// Bit flags packed into [`KernelDims::flags`].
pub mod flags {
    pub const TRANSPOSE_B: u32 = 1 << 0;
    pub const CAUSAL: u32 = 1 << 1;
    pub const ROPE_INTERLEAVED: u32 = 1 << 2;
    pub const NORM_PLUS_ONE: u32 = 1 << 3;
    pub const SCALE_EMBEDDINGS: u32 = 1 << 4;
}

impl KernelDims {
    pub const fn zeroed_dims() -> Self {
        Self {
            rows: 0,
            cols: 0,
            inner: 0,
            heads_q: 0,
            heads_kv: 0,
            head_dim: 0,
            start_pos: 0,
            window: 0,
            flags: 0,
        }
    }

    pub fn has_flag(&self, bit: u32) -> bool {
        self.flags & bit != 0
    }

    pub fn set_flag(&mut self, bit: u32, on: bool) {
        if on {
            self.flags |= bit;
        } else {
            self.flags &= !bit;
        }
    }
}

impl Default for KernelDims {
    fn default() -> Self {
        Self::zeroed_dims()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_round_trips_byte_for_byte() {
        let mut dims = KernelDims {
            rows: 7,
            cols: 11,
            inner: 13,
            heads_q: 32,
            heads_kv: 8,
            head_dim: 128,
            start_pos: 42,
            window: 4096,
            flags: 0,
        };
        dims.set_flag(flags::TRANSPOSE_B, true);
        dims.set_flag(flags::CAUSAL, true);

        let bytes = bytemuck::bytes_of(&dims);
        assert_eq!(bytes.len(), std::mem::size_of::<KernelDims>());

        let back: KernelDims = *bytemuck::from_bytes(bytes);
        assert_eq!(back, dims);
        assert!(back.has_flag(flags::TRANSPOSE_B));
        assert!(back.has_flag(flags::CAUSAL));
        assert!(!back.has_flag(flags::ROPE_INTERLEAVED));

        // Field order is load-bearing: verify each field lands at the byte
        // offset the WGSL-side struct expects.
        assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), 7);
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 11);
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), 13);
        assert_eq!(u32::from_le_bytes(bytes[12..16].try_into().unwrap()), 32);
        assert_eq!(u32::from_le_bytes(bytes[16..20].try_into().unwrap()), 8);
        assert_eq!(u32::from_le_bytes(bytes[20..24].try_into().unwrap()), 128);
        assert_eq!(u32::from_le_bytes(bytes[24..28].try_into().unwrap()), 42);
        assert_eq!(u32::from_le_bytes(bytes[28..32].try_into().unwrap()), 4096);
    }

    #[test]
    fn default_descriptor_is_zeroed() {
        let dims = KernelDims::default();
        assert_eq!(dims.rows, 0);
        assert_eq!(dims.flags, 0);
    }
}

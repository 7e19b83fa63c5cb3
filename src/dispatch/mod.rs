//! Kernel selector (spec §4.3): picks the best registered kernel variant
//! for an operation's operand dtypes/shapes, in the order the spec fixes.

use crate::manifest::DType;

/// A matmul-shaped operation's relevant operand facts.
#[derive(Debug, Clone, Copy)]
pub struct MatmulShape {
    pub b_dtype: DType,
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

impl MatmulShape {
    /// gemv-shaped: a single row times a matrix (decode-step matmuls).
    pub fn is_gemv(&self) -> bool {
        self.m == 1
    }
}

/// The kernel variant the selector resolved for one matmul-shaped call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatmulVariant {
    FusedQ4KMatmul,
    DequantThenF16Matmul,
    SubgroupGemv,
    GenericF32Matmul,
}

/// Device feature facts the selector needs to decide between variants.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectorCaps {
    pub has_fused_q4k_matmul: bool,
    pub has_subgroups: bool,
}

/// Chooses a matmul kernel variant per the four rules of spec §4.3, in
/// order: exact registered match, fused Q4_K dequant+matmul, subgroup
/// gemv, generic f32 fallback.
pub fn select_matmul_variant(shape: MatmulShape, caps: SelectorCaps) -> MatmulVariant {
    // Rule 1: an exact dtype+shape-class match is just "dispatch the
    // variant for this dtype" here, since this crate registers exactly
    // one kernel per dtype rather than a shape-keyed table; rules 2-4
    // cover the cases that need a *choice* among registered variants.
    if shape.b_dtype == DType::Q4K {
        // Rule 2.
        return if caps.has_fused_q4k_matmul {
            MatmulVariant::FusedQ4KMatmul
        } else {
            MatmulVariant::DequantThenF16Matmul
        };
    }

    // Rule 3.
    if caps.has_subgroups && shape.is_gemv() {
        return MatmulVariant::SubgroupGemv;
    }

    // Rule 4.
    MatmulVariant::GenericF32Matmul
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(b_dtype: DType, m: usize) -> MatmulShape {
        MatmulShape { b_dtype, m, n: 128, k: 128 }
    }

    #[test]
    fn q4k_prefers_fused_kernel_when_available() {
        let caps = SelectorCaps { has_fused_q4k_matmul: true, has_subgroups: false };
        assert_eq!(
            select_matmul_variant(shape(DType::Q4K, 4), caps),
            MatmulVariant::FusedQ4KMatmul
        );
    }

    #[test]
    fn q4k_falls_back_to_dequant_then_f16() {
        let caps = SelectorCaps { has_fused_q4k_matmul: false, has_subgroups: false };
        assert_eq!(
            select_matmul_variant(shape(DType::Q4K, 4), caps),
            MatmulVariant::DequantThenF16Matmul
        );
    }

    #[test]
    fn gemv_prefers_subgroup_variant_when_available() {
        let caps = SelectorCaps { has_fused_q4k_matmul: false, has_subgroups: true };
        assert_eq!(
            select_matmul_variant(shape(DType::F32, 1), caps),
            MatmulVariant::SubgroupGemv
        );
    }

    #[test]
    fn falls_back_to_generic_f32() {
        let caps = SelectorCaps::default();
        assert_eq!(
            select_matmul_variant(shape(DType::F32, 8), caps),
            MatmulVariant::GenericF32Matmul
        );
    }
}

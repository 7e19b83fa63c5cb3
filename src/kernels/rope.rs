//! Rotary position embedding (spec §4.2.5).

use crate::manifest::RopeLayout;

/// Rotate `x` (shape `(n_tokens, n_heads, head_dim)`, row-major, in place)
/// by position-dependent angles starting at absolute position `p0`.
///
/// `split` layout pairs dimension `j` with `j + head_dim/2`; `interleaved`
/// pairs `2j` with `2j+1`. Both rotate by `p * theta^(-2j/head_dim)`.
pub fn apply_rope(
    x: &mut [f32],
    n_tokens: usize,
    n_heads: usize,
    head_dim: usize,
    p0: u32,
    theta: f32,
    layout: RopeLayout,
) {
    debug_assert_eq!(x.len(), n_tokens * n_heads * head_dim);
    let half = head_dim / 2;

    for tok in 0..n_tokens {
        let pos = (p0 as usize + tok) as f32;
        for head in 0..n_heads {
            let base = (tok * n_heads + head) * head_dim;
            for j in 0..half {
                let freq = theta.powf(-2.0 * j as f32 / head_dim as f32);
                let angle = pos * freq;
                let (sin, cos) = angle.sin_cos();

                let (i0, i1) = match layout {
                    RopeLayout::Split => (base + j, base + j + half),
                    RopeLayout::Interleaved => (base + 2 * j, base + 2 * j + 1),
                };

                let a = x[i0];
                let b = x[i1];
                x[i0] = a * cos - b * sin;
                x[i1] = a * sin + b * cos;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_position_is_identity() {
        let mut x = vec![1.0f32, 2.0, 3.0, 4.0];
        let before = x.clone();
        apply_rope(&mut x, 1, 1, 4, 0, 10000.0, RopeLayout::Split);
        for (a, b) in x.iter().zip(before.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn rotation_preserves_pair_norm() {
        // head_dim=4, half=2: split pairs are (0,2) and (1,3).
        let mut x = vec![3.0f32, 0.0, 4.0, 0.0];
        apply_rope(&mut x, 1, 1, 4, 5, 10000.0, RopeLayout::Split);
        let pair0_norm = (x[0] * x[0] + x[2] * x[2]).sqrt();
        assert!((pair0_norm - 5.0).abs() < 1e-4);
        let pair1_norm = (x[1] * x[1] + x[3] * x[3]).sqrt();
        assert!(pair1_norm < 1e-4);
    }

    #[test]
    fn different_theta_yields_different_output() {
        let mut a = vec![1.0f32, 0.0, 1.0, 0.0];
        let mut b = a.clone();
        apply_rope(&mut a, 1, 1, 4, 3, 1_000_000.0, RopeLayout::Split);
        apply_rope(&mut b, 1, 1, 4, 3, 10_000.0, RopeLayout::Split);
        assert!((a[0] - b[0]).abs() > 1e-6 || (a[1] - b[1]).abs() > 1e-6);
    }
}

//! RMSNorm (spec §4.2.2, §9).
//!
//! Two weight conventions exist; which one a site uses is fixed by the
//! manifest at load and must never be chosen ad hoc at the call site, so
//! this takes an explicit `plus_one` flag rather than a global default.

/// Normalize each row of `x` (shape `(n_rows, hidden_size)`) in place into
/// `out`, scaling by `w` under the selected convention.
pub fn rmsnorm(x: &[f32], w: &[f32], hidden_size: usize, eps: f32, plus_one: bool, out: &mut [f32]) {
    debug_assert_eq!(x.len() % hidden_size, 0);
    debug_assert_eq!(w.len(), hidden_size);
    debug_assert_eq!(out.len(), x.len());

    let n_rows = x.len() / hidden_size;
    for row in 0..n_rows {
        let slice = &x[row * hidden_size..(row + 1) * hidden_size];
        let mean_sq: f32 =
            slice.iter().map(|v| v * v).sum::<f32>() / hidden_size as f32;
        let scale = 1.0 / (mean_sq + eps).sqrt();

        let out_row = &mut out[row * hidden_size..(row + 1) * hidden_size];
        for i in 0..hidden_size {
            let weight = if plus_one { 1.0 + w[i] } else { w[i] };
            out_row[i] = slice[i] * scale * weight;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_invariance_with_zero_eps() {
        let x = [1.0f32, 2.0, -3.0, 4.0];
        let w = [1.0f32, 1.0, 1.0, 1.0];
        let mut a = [0f32; 4];
        let mut b = [0f32; 4];

        rmsnorm(&x, &w, 4, 0.0, false, &mut a);
        let scaled: Vec<f32> = x.iter().map(|v| v * 7.0).collect();
        rmsnorm(&scaled, &w, 4, 0.0, false, &mut b);

        for (a, b) in a.iter().zip(b.iter()) {
            assert!((a - b).abs() < 1e-5, "{a} vs {b}");
        }
    }

    #[test]
    fn plus_one_convention_shifts_weight() {
        let x = [2.0f32, 2.0];
        let w_zero = [0.0f32, 0.0];
        let mut standard = [0f32; 2];
        let mut plus_one = [0f32; 2];

        rmsnorm(&x, &w_zero, 2, 1e-6, false, &mut standard);
        rmsnorm(&x, &w_zero, 2, 1e-6, true, &mut plus_one);

        assert!(standard.iter().all(|v| v.abs() < 1e-4));
        assert!(plus_one.iter().all(|v| (v - 2.0 / (4.0f32 + 1e-6).sqrt()).abs() < 1e-4));
    }
}

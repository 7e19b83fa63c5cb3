//! SiLU-gated FFN path (spec §4.2.4).

use crate::dispatch::SelectorCaps;
use crate::kernels::matmul::{matmul_dispatched, MatmulB};
use crate::utils::error::Result;

fn silu(x: f32) -> f32 {
    x / (1.0 + (-x).exp())
}

/// `y = silu(X @ gate_proj) * (X @ up_proj) @ down_proj` for hidden `X`
/// shape `(n_rows, hidden_size)`. Projections are `(intermediate_size,
/// hidden_size)` / `(hidden_size, intermediate_size)` weight matrices in
/// the usual `transpose_b` layout. Each projection is routed through the
/// kernel selector (`caps`) rather than always taking the fused path.
pub fn silu_ffn(
    x: &[f32],
    n_rows: usize,
    hidden_size: usize,
    intermediate_size: usize,
    gate_proj: &MatmulB,
    up_proj: &MatmulB,
    down_proj: &MatmulB,
    caps: SelectorCaps,
) -> Result<Vec<f32>> {
    let (gate, _) = matmul_dispatched(x, n_rows, hidden_size, gate_proj, intermediate_size, true, None, caps)?;
    let (up, _) = matmul_dispatched(x, n_rows, hidden_size, up_proj, intermediate_size, true, None, caps)?;

    let mut h = vec![0f32; n_rows * intermediate_size];
    for (hi, (g, u)) in h.iter_mut().zip(gate.iter().zip(up.iter())) {
        *hi = silu(*g) * *u;
    }

    let (down, _) = matmul_dispatched(&h, n_rows, intermediate_size, down_proj, hidden_size, true, None, caps)?;
    Ok(down)
}

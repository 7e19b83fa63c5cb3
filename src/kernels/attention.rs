//! Causal / sliding-window attention, prefill and decode (spec §4.2.6, §4.2.7).
//!
//! Both passes share one implementation: decode is simply `n_q == 1` with
//! `q_start_pos` set to the cache's `used` length. The decode specialization
//! named in §4.2.7 (gemv-shaped dispatch, no `(S,)` score buffer materialized
//! per submit) is a GPU dispatch concern handled by the kernel selector; the
//! CPU reference here is shape-general and correct for both call shapes.

use crate::kernels::reduce::softmax;

/// `Q` shape `(n_q, hq, head_dim)`; `k_cache`/`v_cache` shape `(n_kv, hkv,
/// head_dim)`, both row-major. `q_start_pos` is the absolute sequence
/// position of `Q`'s first row. `window`, if set, restricts each query to
/// the last `window` cache positions (sliding-window attention); `None`
/// means full causal attention.
///
/// Returns `(n_q, hq, head_dim)` output.
pub fn attention(
    q: &[f32],
    n_q: usize,
    k_cache: &[f32],
    v_cache: &[f32],
    n_kv: usize,
    hq: usize,
    hkv: usize,
    head_dim: usize,
    q_start_pos: usize,
    window: Option<usize>,
) -> Vec<f32> {
    debug_assert_eq!(q.len(), n_q * hq * head_dim);
    debug_assert_eq!(k_cache.len(), n_kv * hkv * head_dim);
    debug_assert_eq!(v_cache.len(), n_kv * hkv * head_dim);
    debug_assert_eq!(hq % hkv, 0);

    let group = hq / hkv;
    let inv_sqrt_d = 1.0 / (head_dim as f32).sqrt();
    let mut out = vec![0f32; n_q * hq * head_dim];

    for qi in 0..n_q {
        let abs_pos = q_start_pos + qi;
        let lo = match window {
            Some(w) if w < abs_pos + 1 => abs_pos + 1 - w,
            _ => 0,
        };
        let hi = (abs_pos + 1).min(n_kv);
        if lo >= hi {
            continue;
        }

        for h in 0..hq {
            let kv_head = h / group;
            let q_vec = &q[(qi * hq + h) * head_dim..(qi * hq + h + 1) * head_dim];

            let mut scores = vec![0f32; hi - lo];
            for (si, k_idx) in (lo..hi).enumerate() {
                let k_vec = &k_cache[(k_idx * hkv + kv_head) * head_dim
                    ..(k_idx * hkv + kv_head + 1) * head_dim];
                let mut dot = 0f32;
                for d in 0..head_dim {
                    dot += q_vec[d] * k_vec[d];
                }
                scores[si] = dot * inv_sqrt_d;
            }
            softmax(&mut scores);

            let out_vec =
                &mut out[(qi * hq + h) * head_dim..(qi * hq + h + 1) * head_dim];
            for (si, k_idx) in (lo..hi).enumerate() {
                let v_vec = &v_cache[(k_idx * hkv + kv_head) * head_dim
                    ..(k_idx * hkv + kv_head + 1) * head_dim];
                let weight = scores[si];
                for d in 0..head_dim {
                    out_vec[d] += weight * v_vec[d];
                }
            }
        }
    }

    out
}

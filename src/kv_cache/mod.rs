//! Key-value cache (spec §3.4, §4.5).
//!
//! One ring buffer pair per layer, each holding up to `Smax` positions of
//! `(Hkv, D)` keys/values in f32 host memory. This generalizes the
//! teacher's LRU text-keyed `KVCachePool` into a single-owner, per-layer
//! tensor store: there is no eviction here, only a monotonic `used`
//! counter per layer and an explicit `reset()`.

use tracing::debug;

use crate::utils::error::{DopplerError, Result};

/// One layer's key/value storage.
struct LayerCache {
    k: Vec<f32>,
    v: Vec<f32>,
    used: usize,
}

impl LayerCache {
    fn new(smax: usize, hkv: usize, head_dim: usize) -> Self {
        Self {
            k: vec![0f32; smax * hkv * head_dim],
            v: vec![0f32; smax * hkv * head_dim],
            used: 0,
        }
    }
}

/// Read-only view into one layer's valid cache contents.
pub struct LayerView<'a> {
    pub k: &'a [f32],
    pub v: &'a [f32],
    pub used: usize,
    pub window_start: usize,
}

/// Per-layer rolling KV cache (spec §4.5). Exclusively owned by the
/// pipeline orchestrator; layer blocks only ever borrow views.
pub struct KvCache {
    layers: Vec<LayerCache>,
    smax: usize,
    hkv: usize,
    head_dim: usize,
    sliding_window_size: Option<usize>,
}

impl KvCache {
    pub fn new(num_layers: usize, hkv: usize, head_dim: usize, smax: usize) -> Self {
        Self {
            layers: (0..num_layers).map(|_| LayerCache::new(smax, hkv, head_dim)).collect(),
            smax,
            hkv,
            head_dim,
            sliding_window_size: None,
        }
    }

    pub fn with_sliding_window(mut self, window: Option<usize>) -> Self {
        self.sliding_window_size = window;
        self
    }

    pub fn smax(&self) -> usize {
        self.smax
    }

    pub fn used(&self, layer: usize) -> usize {
        self.layers[layer].used
    }

    /// Write `k_new`/`v_new` (each `(n, hkv, head_dim)`) at `[used, used+n)`
    /// for `layer`, then advance `used`. Fails with `OutOfSeq` if the
    /// cache would overflow `Smax`.
    pub fn append(&mut self, layer: usize, k_new: &[f32], v_new: &[f32], n: usize) -> Result<()> {
        let row_len = self.hkv * self.head_dim;
        debug_assert_eq!(k_new.len(), n * row_len);
        debug_assert_eq!(v_new.len(), n * row_len);

        let cache = &mut self.layers[layer];
        if cache.used + n > self.smax {
            return Err(DopplerError::OutOfSeq(format!(
                "layer {layer}: appending {n} positions at used={} would exceed Smax={}",
                cache.used, self.smax
            )));
        }

        let start = cache.used * row_len;
        cache.k[start..start + n * row_len].copy_from_slice(k_new);
        cache.v[start..start + n * row_len].copy_from_slice(v_new);
        cache.used += n;

        debug!(layer, appended = n, used = cache.used, "kv cache append");
        Ok(())
    }

    /// Borrow the valid prefix of `layer`'s cache. `window_start` is
    /// `used - sliding_window_size` when that is positive and the layer
    /// is local, else `0`.
    pub fn view(&self, layer: usize, is_local: bool) -> LayerView<'_> {
        let cache = &self.layers[layer];
        let row_len = self.hkv * self.head_dim;
        let window_start = if is_local {
            self.sliding_window_size
                .map(|w| cache.used.saturating_sub(w))
                .unwrap_or(0)
        } else {
            0
        };
        LayerView {
            k: &cache.k[..cache.used * row_len],
            v: &cache.v[..cache.used * row_len],
            used: cache.used,
            window_start,
        }
    }

    /// Reset all layers' `used` to zero without deallocating storage.
    pub fn reset(&mut self) {
        for cache in &mut self.layers {
            cache.used = 0;
        }
        debug!("kv cache reset");
    }
}

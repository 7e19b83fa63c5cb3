//! Engine-wide policy configuration
//!
//! Covers the knobs the inference pipeline core leaves to the embedding
//! harness: debug readback policy, the buffer pool's soft cap, the
//! readback timeout that guards against a wedged GPU, and whether the
//! sampler should prefer GPU-side argmax/top-k over a host readback.
//! Loaded the way the teacher's production config is: TOML file with
//! environment-variable overrides, validated before use.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::dispatch::SelectorCaps;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Timeout for a GPU readback before the orchestrator aborts with
    /// `DeviceLost` and poisons the pipeline (spec §5).
    pub readback_timeout: Duration,

    /// Soft cap, in bytes, on the buffer pool's free-list memory before
    /// least-recently-used eviction kicks in (spec §4.1).
    pub pool_soft_cap_bytes: usize,

    /// Whether debug readbacks/timestamp resolution are enabled. Default
    /// off — the spec's open question 1 resolves to "no extra
    /// synchronization in release builds" (see DESIGN.md).
    pub debug: bool,

    /// Layer indices to instrument when `debug` is set. Empty means "all
    /// layers" when debug is on.
    pub debug_layers: Vec<u32>,

    /// Prefer GPU-side sampling (argmax/top-k) over a full logits readback
    /// when both a GPU kernel and the requested sampling mode are
    /// available (spec §5, open question 2).
    pub prefer_gpu_sampling: bool,

    /// Require subgroup support at device acquisition time. If false, the
    /// kernel selector silently falls back to non-subgroup variants.
    pub require_subgroups: bool,

    /// Whether a fused Q4_K dequant+matmul kernel is registered. False
    /// forces the dequant-then-f16 fallback (spec §4.3 rule 2) for every
    /// quantized projection, e.g. when running against a backend that only
    /// ships the generic path.
    pub has_fused_q4k_matmul: bool,

    /// Whether the acquired device supports subgroup operations. Populated
    /// by the harness from `DeviceFeatures::subgroups` after
    /// `Device::acquire`, since the pipeline itself does not hold a device
    /// handle (spec §4.3 rule 3).
    pub gpu_has_subgroups: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            readback_timeout: Duration::from_secs(10),
            pool_soft_cap_bytes: 512 * 1024 * 1024,
            debug: false,
            debug_layers: Vec::new(),
            prefer_gpu_sampling: true,
            require_subgroups: false,
            has_fused_q4k_matmul: true,
            gpu_has_subgroups: false,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_readback_timeout(mut self, timeout: Duration) -> Self {
        self.readback_timeout = timeout;
        self
    }

    pub fn with_pool_soft_cap_bytes(mut self, bytes: usize) -> Self {
        self.pool_soft_cap_bytes = bytes;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_debug_layers(mut self, layers: Vec<u32>) -> Self {
        self.debug_layers = layers;
        self
    }

    pub fn with_prefer_gpu_sampling(mut self, prefer: bool) -> Self {
        self.prefer_gpu_sampling = prefer;
        self
    }

    pub fn debug_layer_enabled(&self, layer: u32) -> bool {
        self.debug && (self.debug_layers.is_empty() || self.debug_layers.contains(&layer))
    }

    pub fn with_has_fused_q4k_matmul(mut self, has_it: bool) -> Self {
        self.has_fused_q4k_matmul = has_it;
        self
    }

    pub fn with_gpu_has_subgroups(mut self, has_them: bool) -> Self {
        self.gpu_has_subgroups = has_them;
        self
    }

    /// Device/kernel-registration facts the matmul selector needs (spec
    /// §4.3), as currently known to this config.
    pub fn selector_caps(&self) -> SelectorCaps {
        SelectorCaps {
            has_fused_q4k_matmul: self.has_fused_q4k_matmul,
            has_subgroups: self.gpu_has_subgroups,
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self, String> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| format!("failed to read config: {e}"))?;
        toml::from_str(&contents).map_err(|e| format!("failed to parse config: {e}"))
    }

    /// Load from `DOPPLER_CONFIG` if set, falling back to defaults, then
    /// apply environment-variable overrides.
    pub fn load() -> Self {
        let mut config = if let Ok(path) = std::env::var("DOPPLER_CONFIG") {
            match Self::from_file(&path) {
                Ok(cfg) => {
                    info!("loaded engine config from {}", path);
                    cfg
                }
                Err(e) => {
                    warn!("failed to load engine config: {}, using defaults", e);
                    Self::default()
                }
            }
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        config
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DOPPLER_DEBUG") {
            self.debug = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("DOPPLER_READBACK_TIMEOUT_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                self.readback_timeout = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("DOPPLER_POOL_SOFT_CAP_BYTES") {
            if let Ok(bytes) = v.parse::<usize>() {
                self.pool_soft_cap_bytes = bytes;
            }
        }
    }

    /// Validate the configuration, returning all problems found rather
    /// than failing on the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.readback_timeout.is_zero() {
            errors.push("readback_timeout must be greater than zero".to_string());
        }
        if self.pool_soft_cap_bytes == 0 {
            errors.push("pool_soft_cap_bytes must be greater than zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_timeout_rejected() {
        let cfg = EngineConfig::new().with_readback_timeout(Duration::from_secs(0));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn debug_layer_filter() {
        let cfg = EngineConfig::new().with_debug(true).with_debug_layers(vec![2, 4]);
        assert!(cfg.debug_layer_enabled(2));
        assert!(!cfg.debug_layer_enabled(3));

        let cfg_all = EngineConfig::new().with_debug(true);
        assert!(cfg_all.debug_layer_enabled(7));
    }
}

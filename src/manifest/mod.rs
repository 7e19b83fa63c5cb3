//! Architecture manifest: the typed, immutable description of a model
//! (spec §3.1, §6.2).
//!
//! A manifest is loaded once and never mutated afterward. It names the
//! architecture's dimensions, positional-embedding parameters, norm
//! convention, and the tensor table the weight loader walks.

use serde::{Deserialize, Serialize};

use crate::utils::error::{DopplerError, Result};

/// Supported tensor element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F32,
    F16,
    Bf16,
    Q4K,
    Q8,
}

impl DType {
    /// Number of elements per quantization block, or 1 for dense dtypes.
    pub fn block_size(self) -> usize {
        match self {
            DType::Q4K => 256,
            DType::Q8 => 32,
            DType::F32 | DType::F16 | DType::Bf16 => 1,
        }
    }

    /// Bytes per block (or per element for dense dtypes).
    pub fn block_bytes(self) -> usize {
        match self {
            DType::Q4K => 144,
            DType::Q8 => 34, // 2-byte f16 scale + 32 int8 values
            DType::F32 => 4,
            DType::F16 | DType::Bf16 => 2,
        }
    }

    pub fn is_quantized(self) -> bool {
        matches!(self, DType::Q4K | DType::Q8)
    }
}

/// Per-model RMSNorm weight convention (spec §9).
///
/// `Standard`: `y = x * rsqrt(mean(x^2) + eps) * w`.
/// `PlusOne`: `y = x * rsqrt(mean(x^2) + eps) * (1 + w)`, for families that
/// store the learned weight centered at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NormConvention {
    #[default]
    Standard,
    PlusOne,
}

/// RoPE pair layout (spec §4.2.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RopeLayout {
    #[default]
    Split,
    Interleaved,
}

/// Descriptor for one named tensor in the manifest (spec §6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorDesc {
    pub name: String,
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub shard_id: String,
    pub byte_offset: u64,
    pub byte_length: u64,
}

impl TensorDesc {
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Full architecture manifest (spec §3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
    pub num_attention_heads: usize,
    pub num_kv_heads: usize,
    pub head_dim: usize,
    pub intermediate_size: usize,
    pub rms_norm_eps: f32,

    pub rope_theta_global: f32,
    pub rope_theta_local: Option<f32>,
    pub sliding_window_pattern: Option<usize>,
    pub rope_layout: RopeLayout,

    pub max_position: usize,
    pub sliding_window_size: Option<usize>,

    pub rms_norm_weight_offset: NormConvention,
    pub scale_embeddings: bool,

    /// Whether the manifest declares the "sandwich norm" post-attention
    /// and post-FFN norms (spec §4.6).
    #[serde(default)]
    pub sandwich_norm: bool,

    /// Whether `lm_head` is tied to the embedding table.
    #[serde(default)]
    pub tied_embeddings: bool,

    pub tensors: Vec<TensorDesc>,
}

impl Manifest {
    /// Whether layer `i` is local/windowed (spec §3.1).
    pub fn is_local_layer(&self, i: usize) -> bool {
        match self.sliding_window_pattern {
            Some(pattern) if pattern > 0 => i % pattern != 0,
            _ => false,
        }
    }

    /// RoPE base frequency for layer `i`.
    pub fn rope_theta_for_layer(&self, i: usize) -> f32 {
        if self.is_local_layer(i) {
            self.rope_theta_local.unwrap_or(self.rope_theta_global)
        } else {
            self.rope_theta_global
        }
    }

    pub fn find_tensor(&self, name: &str) -> Option<&TensorDesc> {
        self.tensors.iter().find(|t| t.name == name)
    }

    /// Validate the shape invariants of spec §3.1: heads divide evenly,
    /// `H == Hq * D`, and quantized tensors' element counts are multiples
    /// of their block size.
    pub fn validate(&self) -> Result<()> {
        if self.num_attention_heads == 0 || self.num_kv_heads == 0 {
            return Err(DopplerError::ManifestInvalid(
                "attention head counts must be nonzero".into(),
            ));
        }
        if self.num_attention_heads % self.num_kv_heads != 0 {
            return Err(DopplerError::ManifestInvalid(format!(
                "num_attention_heads ({}) must be a multiple of num_kv_heads ({})",
                self.num_attention_heads, self.num_kv_heads
            )));
        }
        if self.hidden_size != self.num_attention_heads * self.head_dim {
            return Err(DopplerError::ManifestInvalid(format!(
                "hidden_size ({}) must equal num_attention_heads * head_dim ({} * {})",
                self.hidden_size, self.num_attention_heads, self.head_dim
            )));
        }
        if self.num_layers == 0 {
            return Err(DopplerError::ManifestInvalid(
                "num_layers must be nonzero".into(),
            ));
        }
        if let Some(w) = self.sliding_window_size {
            if w == 0 {
                return Err(DopplerError::ManifestInvalid(
                    "sliding_window_size must be nonzero when present".into(),
                ));
            }
        }
        for t in &self.tensors {
            let block = t.dtype.block_size();
            if block > 1 && t.element_count() % block != 0 {
                return Err(DopplerError::ManifestInvalid(format!(
                    "tensor {} has {} elements, not a multiple of block size {} for {:?}",
                    t.name,
                    t.element_count(),
                    block,
                    t.dtype
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_manifest() -> Manifest {
        Manifest {
            vocab_size: 32000,
            hidden_size: 4096,
            num_layers: 32,
            num_attention_heads: 32,
            num_kv_heads: 8,
            head_dim: 128,
            intermediate_size: 11008,
            rms_norm_eps: 1e-5,
            rope_theta_global: 1_000_000.0,
            rope_theta_local: Some(10_000.0),
            sliding_window_pattern: Some(4),
            rope_layout: RopeLayout::Split,
            max_position: 8192,
            sliding_window_size: Some(4096),
            rms_norm_weight_offset: NormConvention::Standard,
            scale_embeddings: false,
            sandwich_norm: false,
            tied_embeddings: false,
            tensors: vec![],
        }
    }

    #[test]
    fn valid_manifest_passes() {
        assert!(sample_manifest().validate().is_ok());
    }

    #[test]
    fn rejects_non_dividing_heads() {
        let mut m = sample_manifest();
        m.num_kv_heads = 7;
        assert!(m.validate().is_err());
    }

    #[test]
    fn rejects_inconsistent_hidden_size() {
        let mut m = sample_manifest();
        m.hidden_size = 1234;
        assert!(m.validate().is_err());
    }

    #[test]
    fn local_global_layer_pattern() {
        let m = sample_manifest();
        assert!(!m.is_local_layer(0));
        assert!(m.is_local_layer(1));
        assert!(m.is_local_layer(2));
        assert!(m.is_local_layer(3));
        assert!(!m.is_local_layer(4));
    }

    #[test]
    fn theta_follows_layer_flavor() {
        let m = sample_manifest();
        assert_eq!(m.rope_theta_for_layer(0), 1_000_000.0);
        assert_eq!(m.rope_theta_for_layer(1), 10_000.0);
    }

    #[test]
    fn rejects_misaligned_quantized_tensor() {
        let mut m = sample_manifest();
        m.tensors.push(TensorDesc {
            name: "bad".into(),
            dtype: DType::Q4K,
            shape: vec![300],
            shard_id: "0".into(),
            byte_offset: 0,
            byte_length: 0,
        });
        assert!(m.validate().is_err());
    }
}

//! Weight loader (spec §4.4): realizes manifest tensors as GPU buffers.
//!
//! Host-side realization (shard read, dtype normalization, layout fixups)
//! is exercised directly by unit tests; GPU upload is a thin pass over the
//! already-validated host bytes and is not itself where correctness risk
//! lives — the transform step is.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::gpu::{BufferPool, BufferUsage, Device};
use crate::manifest::{DType, Manifest, NormConvention, TensorDesc};
use crate::shard::ShardReader;
use crate::utils::error::{DopplerError, Result};

/// One transform applied while realizing a tensor. At most one per tensor
/// (spec §4.4); each variant's `apply` is idempotent so a retried load
/// never double-applies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transform {
    None,
    WidenBf16ToF16,
}

fn transform_for(tensor: &TensorDesc, device_supports_bf16: bool) -> Transform {
    if tensor.dtype == DType::Bf16 && !device_supports_bf16 {
        Transform::WidenBf16ToF16
    } else {
        Transform::None
    }
}

fn apply_transform(bytes: Vec<u8>, transform: Transform) -> Vec<u8> {
    match transform {
        Transform::None => bytes,
        Transform::WidenBf16ToF16 => {
            // bf16 -> f32 -> f16, widening the mantissa then narrowing the
            // exponent range back down; idempotent because re-applying to
            // already-f16 bytes of the same length is a logic error we
            // guard against by tracking the tensor's declared dtype, not
            // its current byte length.
            let mut out = Vec::with_capacity(bytes.len());
            for chunk in bytes.chunks_exact(2) {
                let bits = u16::from_le_bytes([chunk[0], chunk[1]]);
                let f32_bits = (bits as u32) << 16;
                let value = f32::from_bits(f32_bits);
                out.extend_from_slice(&half::f16::from_f32(value).to_le_bytes());
            }
            out
        }
    }
}

/// A realized tensor: its normalized host bytes plus the dtype those
/// bytes are now encoded in (post-transform).
pub struct RealizedTensor {
    pub name: String,
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub bytes: Vec<u8>,
}

impl RealizedTensor {
    /// Borrow this tensor's bytes as a matmul right-hand operand, dtyped
    /// per its current (post-transform) dtype.
    pub fn as_matmul_b(&self) -> Result<crate::kernels::MatmulB<'_>> {
        use crate::kernels::MatmulB;
        match self.dtype {
            DType::F32 => Ok(MatmulB::F32(bytemuck::cast_slice(&self.bytes))),
            DType::F16 => Ok(MatmulB::F16(bytemuck::cast_slice(&self.bytes))),
            DType::Q4K => Ok(MatmulB::Q4K(&self.bytes)),
            DType::Bf16 | DType::Q8 => Err(DopplerError::DtypeMismatch(format!(
                "tensor {} has dtype {:?} with no matmul kernel variant",
                self.name, self.dtype
            ))),
        }
    }

    /// Borrow this tensor's bytes as a dense f32 slice (norm weights,
    /// biases — always stored dense, never quantized).
    pub fn as_f32(&self) -> Result<&[f32]> {
        match self.dtype {
            DType::F32 => Ok(bytemuck::cast_slice(&self.bytes)),
            other => Err(DopplerError::DtypeMismatch(format!(
                "tensor {} expected f32, has dtype {:?}",
                self.name, other
            ))),
        }
    }
}

/// Immutable, load-once map of realized weights (spec §4.4).
pub struct Weights {
    tensors: HashMap<String, RealizedTensor>,
    /// Per-model convention the loader resolved at load time; layer code
    /// reads this rather than re-deriving it, so the convention is applied
    /// exactly once regardless of how many norm sites consult it.
    pub norm_convention: NormConvention,
}

impl Weights {
    pub fn get(&self, name: &str) -> Option<&RealizedTensor> {
        self.tensors.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&RealizedTensor> {
        self.tensors
            .get(name)
            .ok_or_else(|| DopplerError::ManifestInvalid(format!("missing tensor {name}")))
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

/// Loads manifest tensors from a [`ShardReader`] into a [`Weights`] map.
pub struct WeightLoader<'a> {
    manifest: &'a Manifest,
    reader: &'a dyn ShardReader,
    debug: bool,
}

const MAX_SHARD_READ_ATTEMPTS: u32 = 3;
/// Base delay for shard-read retry backoff; doubles each attempt
/// (10ms, 20ms, ...), per spec §7's bounded-backoff loader-retry policy.
const SHARD_READ_BACKOFF_BASE: Duration = Duration::from_millis(10);

impl<'a> WeightLoader<'a> {
    pub fn new(manifest: &'a Manifest, reader: &'a dyn ShardReader, debug: bool) -> Self {
        Self {
            manifest,
            reader,
            debug,
        }
    }

    /// Realize every tensor named in the manifest, retrying individual
    /// shard reads with bounded backoff before surfacing `IoFailure`
    /// (spec §7 loader-retry policy).
    pub fn load(&self, device_supports_bf16: bool) -> Result<Weights> {
        let mut tensors = HashMap::with_capacity(self.manifest.tensors.len());

        for tensor in &self.manifest.tensors {
            let bytes = self.read_with_retry(tensor)?;
            let transform = transform_for(tensor, device_supports_bf16);
            let bytes = apply_transform(bytes, transform);
            let dtype = match transform {
                Transform::None => tensor.dtype,
                Transform::WidenBf16ToF16 => DType::F16,
            };

            if self.debug {
                self.log_norm_extrema(tensor, &bytes, dtype);
            }

            tensors.insert(
                tensor.name.clone(),
                RealizedTensor {
                    name: tensor.name.clone(),
                    dtype,
                    shape: tensor.shape.clone(),
                    bytes,
                },
            );
        }

        Ok(Weights {
            tensors,
            norm_convention: self.manifest.rms_norm_weight_offset,
        })
    }

    fn read_with_retry(&self, tensor: &TensorDesc) -> Result<Vec<u8>> {
        let mut last_err = None;
        for attempt in 0..MAX_SHARD_READ_ATTEMPTS {
            match self
                .reader
                .read(&tensor.shard_id, tensor.byte_offset, tensor.byte_length)
            {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    warn!(tensor = %tensor.name, attempt, error = %e, "shard read failed, retrying");
                    last_err = Some(e);
                    if attempt + 1 < MAX_SHARD_READ_ATTEMPTS {
                        std::thread::sleep(SHARD_READ_BACKOFF_BASE * 2u32.pow(attempt));
                    }
                }
            }
        }
        Err(last_err.unwrap_or(DopplerError::IoFailure(format!(
            "exhausted retries reading tensor {}",
            tensor.name
        ))))
    }

    /// Warn-only sanity check on norm weight ranges (spec §4.4: invariants
    /// here are warnings, not errors, to tolerate architectural variants).
    fn log_norm_extrema(&self, tensor: &TensorDesc, bytes: &[u8], dtype: DType) {
        if !tensor.name.ends_with("_ln") && !tensor.name.ends_with("norm.weight") {
            return;
        }
        if dtype != DType::F32 && dtype != DType::F16 {
            return;
        }
        let values: Vec<f32> = match dtype {
            DType::F32 => bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            DType::F16 => bytes
                .chunks_exact(2)
                .map(|c| half::f16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect(),
            _ => return,
        };
        let min = values.iter().copied().fold(f32::INFINITY, f32::min);
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        debug!(tensor = %tensor.name, min, max, "norm weight range");
        if !(-10.0..=10.0).contains(&min) || !(-10.0..=10.0).contains(&max) {
            warn!(tensor = %tensor.name, min, max, "norm weight range outside expected envelope");
        }
    }
}

/// Upload a realized tensor's bytes into a pooled, read-only GPU buffer.
/// The returned [`crate::gpu::PooledBuffer`] must be released back to the
/// pool by the caller once it is no longer referenced by any layer.
pub fn upload(
    device: &Device,
    pool: &Arc<BufferPool>,
    tensor: &RealizedTensor,
) -> crate::gpu::PooledBuffer {
    let buffer = pool.alloc(tensor.bytes.len() as u64, BufferUsage::StorageRO);
    device
        .wgpu_queue()
        .write_buffer(&buffer.buffer, 0, &tensor.bytes);
    buffer
}

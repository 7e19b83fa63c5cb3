//! Error types for the Doppler inference core

use thiserror::Error;

/// Error taxonomy for the inference pipeline core (spec §7).
///
/// Variants are grouped by where they surface: device-init failures are
/// fatal and cannot be retried in-process; loader failures may be retried
/// per shard; kernel/shape failures indicate a bug against a validated
/// manifest and should never occur in practice; `DeviceLost` poisons the
/// pipeline until an explicit `reset()` on a fresh device.
#[derive(Error, Debug)]
pub enum DopplerError {
    #[error("no compatible GPU adapter found")]
    NoGpu,

    #[error("required GPU feature unsupported: {0}")]
    FeatureUnsupported(String),

    #[error("manifest invalid: {0}")]
    ManifestInvalid(String),

    #[error("shard read failed: {0}")]
    IoFailure(String),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("dtype mismatch: {0}")]
    DtypeMismatch(String),

    #[error("token id out of range: {0}")]
    OutOfRange(String),

    #[error("KV cache overflow: {0}")]
    OutOfSeq(String),

    #[error("device lost, pipeline poisoned until reset(): {0}")]
    DeviceLost(String),

    #[error("generation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DopplerError>;

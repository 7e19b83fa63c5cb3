//! GPU device acquisition and pooled buffer allocation (spec §4.1).

pub mod device;
pub mod pool;

pub use device::{Device, DeviceFeatures};
pub use pool::{BufferPool, BufferUsage, PoolStats, PooledBuffer};

//! GPU adapter/device acquisition and feature negotiation.

use std::sync::Arc;

use tracing::{info, warn};

use crate::utils::error::{DopplerError, Result};

/// Optional GPU features the kernel library can take advantage of.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceFeatures {
    pub f16_storage: bool,
    pub subgroups: bool,
    pub timestamp_queries: bool,
}

/// A logical GPU device: the adapter, the `wgpu` device/queue pair, and
/// the negotiated feature set. The device handle is `Arc`-wrapped so a
/// [`crate::gpu::BufferPool`] can share ownership of it without this
/// struct giving up its own reference.
pub struct Device {
    pub(crate) device: Arc<wgpu::Device>,
    pub(crate) queue: wgpu::Queue,
    pub features: DeviceFeatures,
    adapter_name: String,
}

impl Device {
    /// Acquire a GPU adapter and logical device (spec §4.1).
    ///
    /// Fails with `NoGpu` if no adapter is available, `FeatureUnsupported`
    /// if the minimum required features (storage buffers, compute) are
    /// missing. Optional features (f16 storage, subgroups, timestamp
    /// queries) are negotiated best-effort and reported in `features`.
    pub fn acquire(require_subgroups: bool) -> Result<Self> {
        pollster::block_on(Self::acquire_async(require_subgroups))
    }

    pub async fn acquire_async(require_subgroups: bool) -> Result<Self> {
        let instance = wgpu::Instance::default();

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(DopplerError::NoGpu)?;

        let adapter_info = adapter.get_info();
        let adapter_features = adapter.features();

        let mut wanted = wgpu::Features::empty();
        let f16_storage = adapter_features.contains(wgpu::Features::SHADER_F16);
        if f16_storage {
            wanted |= wgpu::Features::SHADER_F16;
        }
        let subgroups = adapter_features.contains(wgpu::Features::SUBGROUP);
        if subgroups {
            wanted |= wgpu::Features::SUBGROUP;
        }
        if require_subgroups && !subgroups {
            return Err(DopplerError::FeatureUnsupported(
                "subgroups required but unavailable on this adapter".into(),
            ));
        }
        let timestamp_queries =
            adapter_features.contains(wgpu::Features::TIMESTAMP_QUERY);
        if timestamp_queries {
            wanted |= wgpu::Features::TIMESTAMP_QUERY;
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("doppler-device"),
                    required_features: wanted,
                    required_limits: wgpu::Limits::downlevel_defaults(),
                    ..Default::default()
                },
                None,
            )
            .await
            .map_err(|e| DopplerError::FeatureUnsupported(e.to_string()))?;

        let features = DeviceFeatures {
            f16_storage,
            subgroups,
            timestamp_queries,
        };

        info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            f16_storage,
            subgroups,
            timestamp_queries,
            "acquired GPU device"
        );
        if !f16_storage {
            warn!("adapter lacks f16 storage; weights will be widened to f32 on upload");
        }

        Ok(Self {
            device: Arc::new(device),
            queue,
            features,
            adapter_name: adapter_info.name,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    pub fn wgpu_device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Clone the shared handle to the underlying `wgpu::Device`, for
    /// constructing a [`crate::gpu::BufferPool`] bound to this device.
    pub fn device_arc(&self) -> Arc<wgpu::Device> {
        Arc::clone(&self.device)
    }

    pub fn wgpu_queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Block until all submitted work on this device's queue has
    /// completed. Used at debug checkpoints and before teardown (spec §5).
    pub fn wait_idle(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}

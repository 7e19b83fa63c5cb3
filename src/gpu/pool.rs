//! Pooled GPU buffer allocation (spec §4.1).
//!
//! Buffers are grouped into power-of-two size classes; `release()` never
//! frees a buffer immediately, it returns it to its class's free list for
//! reuse. A soft byte cap evicts the least-recently-released entries first,
//! oldest-touched, so a pool under steady load converges on a small set of
//! reused allocations instead of churning the allocator.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

/// What a buffer is bound for; determines the `wgpu::BufferUsages` bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Read-write storage buffer bound to a compute shader.
    StorageRW,
    /// Read-only storage buffer (weights, constant inputs).
    StorageRO,
    /// Small uniform buffer carrying a kernel descriptor.
    Uniform,
    /// Host-visible buffer for map-read/map-write transfers.
    Staging,
}

impl BufferUsage {
    fn wgpu_usages(self) -> wgpu::BufferUsages {
        use wgpu::BufferUsages as U;
        match self {
            BufferUsage::StorageRW => U::STORAGE | U::COPY_SRC | U::COPY_DST,
            BufferUsage::StorageRO => U::STORAGE | U::COPY_DST,
            BufferUsage::Uniform => U::UNIFORM | U::COPY_DST,
            BufferUsage::Staging => U::MAP_READ | U::COPY_DST,
        }
    }
}

/// A buffer leased from the pool. Dropping it without calling
/// [`BufferPool::release`] leaks the slot's live-count accounting, so
/// callers hand it back explicitly rather than relying on `Drop`;
/// pipeline code always pairs `alloc` with `release` in the same scope.
pub struct PooledBuffer {
    pub buffer: Arc<wgpu::Buffer>,
    pub size: u64,
    pub usage: BufferUsage,
    class_bytes: u64,
}

impl PooledBuffer {
    pub fn class_bytes(&self) -> u64 {
        self.class_bytes
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PoolStats {
    pub bytes_allocated: u64,
    pub peak_bytes_allocated: u64,
    pub live_count: u64,
    pub free_count: u64,
}

fn size_class(requested: u64) -> u64 {
    requested.max(256).next_power_of_two()
}

struct FreeEntry {
    buffer: Arc<wgpu::Buffer>,
    touch: u64,
}

struct Inner {
    free_lists: HashMap<(u64, BufferUsage), VecDeque<FreeEntry>>,
    bytes_allocated: u64,
    peak_bytes_allocated: u64,
    live_count: u64,
    soft_cap_bytes: u64,
    clock: u64,
}

/// Size-classed buffer pool over one `wgpu::Device`.
pub struct BufferPool {
    device: Arc<wgpu::Device>,
    inner: Mutex<Inner>,
    allocations: AtomicU64,
}

impl BufferPool {
    pub fn new(device: Arc<wgpu::Device>, soft_cap_bytes: u64) -> Self {
        Self {
            device,
            inner: Mutex::new(Inner {
                free_lists: HashMap::new(),
                bytes_allocated: 0,
                peak_bytes_allocated: 0,
                live_count: 0,
                soft_cap_bytes,
                clock: 0,
            }),
            allocations: AtomicU64::new(0),
        }
    }

    /// Lease a buffer of at least `size` bytes for `usage`. Reuses a
    /// free-list entry of the matching size class when one exists,
    /// otherwise allocates fresh.
    pub fn alloc(&self, size: u64, usage: BufferUsage) -> PooledBuffer {
        let class = size_class(size);
        let mut inner = self.inner.lock().expect("buffer pool mutex poisoned");

        let reused = inner
            .free_lists
            .get_mut(&(class, usage))
            .and_then(|list| list.pop_back());

        let buffer = if let Some(entry) = reused {
            entry.buffer
        } else {
            let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("doppler-pooled-buffer"),
                size: class,
                usage: usage.wgpu_usages(),
                mapped_at_creation: false,
            });
            inner.bytes_allocated += class;
            inner.peak_bytes_allocated = inner.peak_bytes_allocated.max(inner.bytes_allocated);
            Arc::new(buffer)
        };

        inner.live_count += 1;
        self.allocations.fetch_add(1, Ordering::Relaxed);

        PooledBuffer {
            buffer,
            size,
            usage,
            class_bytes: class,
        }
    }

    /// Return a buffer to its size class's free list. Never frees the
    /// underlying `wgpu::Buffer` directly; eviction under the soft cap
    /// drops the `Arc` instead, which frees once the GPU is done with it.
    pub fn release(&self, buffer: PooledBuffer) {
        let mut inner = self.inner.lock().expect("buffer pool mutex poisoned");
        inner.live_count = inner.live_count.saturating_sub(1);
        inner.clock += 1;
        let touch = inner.clock;

        inner
            .free_lists
            .entry((buffer.class_bytes, buffer.usage))
            .or_default()
            .push_back(FreeEntry {
                buffer: buffer.buffer,
                touch,
            });

        self.evict_to_cap(&mut inner);
    }

    /// Evict least-recently-released free-list entries until total
    /// allocated bytes falls under the soft cap, or no free entries remain.
    fn evict_to_cap(&self, inner: &mut Inner) {
        if inner.bytes_allocated <= inner.soft_cap_bytes {
            return;
        }
        loop {
            if inner.bytes_allocated <= inner.soft_cap_bytes {
                break;
            }
            let oldest = inner
                .free_lists
                .iter()
                .filter(|(_, list)| !list.is_empty())
                .min_by_key(|(_, list)| list.front().map(|e| e.touch).unwrap_or(u64::MAX));

            let Some((&key, _)) = oldest else {
                break;
            };

            let list = inner.free_lists.get_mut(&key).expect("key just observed");
            if let Some(entry) = list.pop_front() {
                inner.bytes_allocated = inner.bytes_allocated.saturating_sub(key.0);
                debug!(class_bytes = key.0, "evicted buffer pool entry over soft cap");
                drop(entry);
            }
            if list.is_empty() {
                inner.free_lists.remove(&key);
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().expect("buffer pool mutex poisoned");
        let free_count = inner.free_lists.values().map(|l| l.len() as u64).sum();
        PoolStats {
            bytes_allocated: inner.bytes_allocated,
            peak_bytes_allocated: inner.peak_bytes_allocated,
            live_count: inner.live_count,
            free_count,
        }
    }

    pub fn total_allocation_calls(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_class_rounds_up_to_power_of_two() {
        assert_eq!(size_class(1), 256);
        assert_eq!(size_class(256), 256);
        assert_eq!(size_class(257), 512);
        assert_eq!(size_class(4096), 4096);
    }
}

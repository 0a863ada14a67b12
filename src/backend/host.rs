//! Host-memory allocator
//!
//! Stands in for device memory on machines without a ROCm runtime and in
//! tests. Blocks are plain heap buffers tagged with the requested device.
//! Live allocation counters make leaks and frees observable, and an optional
//! capacity limit simulates device out-of-memory.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::allocator::{DeviceAllocator, DeviceBuffer, DeviceMemory};
use super::device::Device;
use crate::error::{PoolError, PoolResult};

#[derive(Debug, Default)]
struct HostCounters {
    live_allocations: AtomicUsize,
    live_bytes: AtomicUsize,
    total_allocations: AtomicUsize,
}

/// Allocator backed by host heap memory
///
/// Clones share their counters, so a test can keep one clone while the pool
/// owns another.
#[derive(Debug, Clone, Default)]
pub struct HostAllocator {
    counters: Arc<HostCounters>,
    capacity_bytes: Option<usize>,
}

impl HostAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail allocations that would push live bytes above `capacity_bytes`
    pub fn with_capacity_limit(mut self, capacity_bytes: usize) -> Self {
        self.capacity_bytes = Some(capacity_bytes);
        self
    }

    /// Allocations not yet freed
    pub fn live_allocations(&self) -> usize {
        self.counters.live_allocations.load(Ordering::SeqCst)
    }

    /// Bytes not yet freed
    pub fn live_bytes(&self) -> usize {
        self.counters.live_bytes.load(Ordering::SeqCst)
    }

    /// Allocations ever served
    pub fn total_allocations(&self) -> usize {
        self.counters.total_allocations.load(Ordering::SeqCst)
    }
}

impl DeviceAllocator for HostAllocator {
    fn name(&self) -> &'static str {
        "host"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn allocate(&self, size_bytes: usize, device: Device) -> PoolResult<DeviceBuffer> {
        let capacity = self.capacity_bytes;
        let reserved = self
            .counters
            .live_bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                let next = live.checked_add(size_bytes)?;
                match capacity {
                    Some(limit) if next > limit => None,
                    _ => Some(next),
                }
            });

        if let Err(live) = reserved {
            return Err(PoolError::DeviceAllocationFailed(match capacity {
                Some(limit) => format!(
                    "out of memory on {}: requested {} bytes, {} of {} in use",
                    device, size_bytes, live, limit
                ),
                None => format!(
                    "out of memory on {}: requested {} bytes with {} in use",
                    device, size_bytes, live
                ),
            }));
        }

        let mut data: Vec<u8> = Vec::new();
        if let Err(e) = data.try_reserve_exact(size_bytes) {
            self.counters
                .live_bytes
                .fetch_sub(size_bytes, Ordering::SeqCst);
            return Err(PoolError::DeviceAllocationFailed(format!(
                "host allocation of {} bytes for {} failed: {}",
                size_bytes, device, e
            )));
        }
        data.resize(size_bytes, 0);

        self.counters.live_allocations.fetch_add(1, Ordering::SeqCst);
        self.counters.total_allocations.fetch_add(1, Ordering::SeqCst);

        tracing::trace!("HostAllocator: allocated {} bytes for {}", size_bytes, device);

        Ok(DeviceBuffer::new(HostMemory {
            data: Mutex::new(data),
            size: size_bytes,
            device,
            counters: Arc::clone(&self.counters),
        }))
    }
}

#[derive(Debug)]
struct HostMemory {
    data: Mutex<Vec<u8>>,
    size: usize,
    device: Device,
    counters: Arc<HostCounters>,
}

impl DeviceMemory for HostMemory {
    fn size(&self) -> usize {
        self.size
    }

    fn device(&self) -> Device {
        self.device
    }

    fn fill_bytes(&self, pattern: &[u8]) -> PoolResult<()> {
        if pattern.is_empty() {
            return Err(PoolError::MemoryCopyFailed(
                "fill pattern cannot be empty".to_string(),
            ));
        }
        let mut data = self.data.lock()?;
        for chunk in data.chunks_mut(pattern.len()) {
            chunk.copy_from_slice(&pattern[..chunk.len()]);
        }
        Ok(())
    }

    fn copy_to_host(&self) -> PoolResult<Vec<u8>> {
        Ok(self.data.lock()?.clone())
    }
}

impl Drop for HostMemory {
    fn drop(&mut self) {
        self.counters.live_allocations.fetch_sub(1, Ordering::SeqCst);
        self.counters.live_bytes.fetch_sub(self.size, Ordering::SeqCst);
    }
}

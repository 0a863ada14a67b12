//! Device allocator seam
//!
//! The pool never talks to a device runtime directly. It asks a
//! [`DeviceAllocator`] for whole blocks on a miss and lets the returned
//! [`DeviceBuffer`] free itself when the last reference drops.

use std::fmt;
use std::sync::Arc;

use super::device::Device;
use crate::error::PoolResult;

/// One contiguous device allocation
///
/// Implementations free their memory in `Drop`.
pub trait DeviceMemory: Send + Sync + fmt::Debug {
    /// Size in bytes
    fn size(&self) -> usize;

    /// Device the memory lives on
    fn device(&self) -> Device;

    /// Fill the whole allocation by repeating `pattern`
    ///
    /// A trailing partial repetition is truncated to the allocation size.
    fn fill_bytes(&self, pattern: &[u8]) -> PoolResult<()>;

    /// Copy the whole allocation back to the host
    fn copy_to_host(&self) -> PoolResult<Vec<u8>>;
}

/// Reference-counted handle to device memory
///
/// Cloning is cheap. The memory is released once the pool and every caller
/// holding a clone have dropped theirs.
#[derive(Debug, Clone)]
pub struct DeviceBuffer {
    inner: Arc<dyn DeviceMemory>,
}

impl DeviceBuffer {
    pub fn new<M: DeviceMemory + 'static>(memory: M) -> Self {
        DeviceBuffer {
            inner: Arc::new(memory),
        }
    }

    /// Get buffer size in bytes
    pub fn size(&self) -> usize {
        self.inner.size()
    }

    pub fn device(&self) -> Device {
        self.inner.device()
    }

    pub fn fill_bytes(&self, pattern: &[u8]) -> PoolResult<()> {
        self.inner.fill_bytes(pattern)
    }

    pub fn copy_to_host(&self) -> PoolResult<Vec<u8>> {
        self.inner.copy_to_host()
    }

    /// True when both handles refer to the same allocation
    pub fn ptr_eq(&self, other: &DeviceBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live handles to this allocation
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

/// Source of fresh device memory for the pool
///
/// Allocation errors are returned unchanged to the pool's caller; the pool
/// never retries them.
pub trait DeviceAllocator: Send + Sync + fmt::Debug {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Runtime capability check: can this allocator serve requests at all?
    fn is_available(&self) -> bool;

    /// Allocate `size_bytes` of uninitialized memory on `device`
    fn allocate(&self, size_bytes: usize, device: Device) -> PoolResult<DeviceBuffer>;
}

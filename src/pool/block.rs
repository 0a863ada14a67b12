//! Pooled block descriptors

use std::time::{Duration, Instant};

use super::types::{BlockHandle, DType, PoolKey};
use crate::backend::{Device, DeviceBuffer};
use crate::error::PoolResult;

/// Metadata and device memory for one pooled block
///
/// Owned exclusively by its [`ShapePool`](super::ShapePool). `in_use` only
/// changes through [`mark_used`](Self::mark_used) and
/// [`mark_released`](Self::mark_released).
#[derive(Debug)]
pub struct MemoryBlock {
    handle: BlockHandle,
    key: PoolKey,
    buffer: DeviceBuffer,
    allocated_at: Instant,
    last_used_at: Instant,
    in_use: bool,
}

impl MemoryBlock {
    /// Wrap a freshly allocated buffer; the block starts free
    pub fn new(key: PoolKey, buffer: DeviceBuffer) -> Self {
        let now = Instant::now();
        MemoryBlock {
            handle: BlockHandle::next(),
            key,
            buffer,
            allocated_at: now,
            last_used_at: now,
            in_use: false,
        }
    }

    pub fn mark_used(&mut self) {
        self.in_use = true;
        self.last_used_at = Instant::now();
    }

    pub fn mark_released(&mut self) {
        self.in_use = false;
        self.last_used_at = Instant::now();
    }

    pub fn handle(&self) -> BlockHandle {
        self.handle
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    pub fn shape(&self) -> &[usize] {
        &self.key.shape
    }

    pub fn dtype(&self) -> DType {
        self.key.dtype
    }

    pub fn device(&self) -> Device {
        self.key.device
    }

    pub fn buffer(&self) -> &DeviceBuffer {
        &self.buffer
    }

    pub fn allocated_at(&self) -> Instant {
        self.allocated_at
    }

    pub fn last_used_at(&self) -> Instant {
        self.last_used_at
    }

    pub fn in_use(&self) -> bool {
        self.in_use
    }

    pub fn size_bytes(&self) -> usize {
        self.key.block_size_bytes()
    }

    /// Free and untouched for at least `ttl` as of `now`
    pub fn is_stale(&self, ttl: Duration, now: Instant) -> bool {
        !self.in_use && now.saturating_duration_since(self.last_used_at) >= ttl
    }

    /// Caller-facing view of this block
    pub fn to_pooled(&self) -> PooledBlock {
        PooledBlock {
            handle: self.handle,
            key: self.key.clone(),
            buffer: self.buffer.clone(),
            allocated_at: self.allocated_at,
            pooled: true,
        }
    }
}

/// A block handed out by the pool
///
/// Borrowed from the pool between acquire and release: keep it only until
/// the matching release. The buffer is reference counted, so a stale copy
/// never dangles, but writes through it after release race with the next
/// owner of the block.
#[derive(Debug, Clone)]
pub struct PooledBlock {
    handle: BlockHandle,
    key: PoolKey,
    buffer: DeviceBuffer,
    allocated_at: Instant,
    pooled: bool,
}

impl PooledBlock {
    /// Block served straight from the allocator while pooling is disabled
    pub(crate) fn unpooled(key: PoolKey, buffer: DeviceBuffer) -> Self {
        PooledBlock {
            handle: BlockHandle::next(),
            key,
            buffer,
            allocated_at: Instant::now(),
            pooled: false,
        }
    }

    pub fn handle(&self) -> BlockHandle {
        self.handle
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    pub fn shape(&self) -> &[usize] {
        &self.key.shape
    }

    pub fn dtype(&self) -> DType {
        self.key.dtype
    }

    pub fn device(&self) -> Device {
        self.key.device
    }

    pub fn buffer(&self) -> &DeviceBuffer {
        &self.buffer
    }

    pub fn allocated_at(&self) -> Instant {
        self.allocated_at
    }

    pub fn size_bytes(&self) -> usize {
        self.key.block_size_bytes()
    }

    /// False for blocks the pool does not track (pooling disabled)
    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    /// Fill every element with `value` converted to the block's element type
    pub fn fill(&self, value: f64) -> PoolResult<()> {
        self.buffer.fill_bytes(&self.key.dtype.encode_scalar(value))
    }
}

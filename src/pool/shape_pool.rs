//! Per-shape block bucket
//!
//! A [`ShapePool`] owns every block for one (shape, element type, device)
//! key. Its mutex guards the block vector; the manager never holds it across
//! its own map lock longer than a scan.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::block::{MemoryBlock, PooledBlock};
use super::stats::BucketStats;
use super::types::{BlockHandle, PoolKey};
use crate::backend::DeviceAllocator;
use crate::error::{PoolError, PoolResult};

#[derive(Debug, Default)]
struct ShapePoolState {
    blocks: Vec<MemoryBlock>,
    hits: u64,
    misses: u64,
}

/// Bucket of interchangeable blocks sharing one [`PoolKey`]
///
/// Invariant: never more than `max_blocks` blocks, all carrying this key.
#[derive(Debug)]
pub struct ShapePool {
    key: PoolKey,
    max_blocks: usize,
    allocator: Arc<dyn DeviceAllocator>,
    state: Mutex<ShapePoolState>,
}

impl ShapePool {
    pub fn new(key: PoolKey, max_blocks: usize, allocator: Arc<dyn DeviceAllocator>) -> Self {
        ShapePool {
            key,
            max_blocks,
            allocator,
            state: Mutex::new(ShapePoolState::default()),
        }
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    pub fn max_blocks(&self) -> usize {
        self.max_blocks
    }

    pub fn block_size_bytes(&self) -> usize {
        self.key.block_size_bytes()
    }

    /// Hand out a free block, allocating one if the bucket has room
    ///
    /// # Errors
    /// - `PoolExhausted` when every block is in use and the bucket is full.
    ///   Never retried here; the caller decides whether to wait, release or
    ///   fall back to an uncached allocation.
    /// - Device allocation errors, unchanged.
    pub fn acquire(&self) -> PoolResult<PooledBlock> {
        let mut guard = self.state.lock()?;
        let state = &mut *guard;

        if let Some(block) = state.blocks.iter_mut().find(|b| !b.in_use()) {
            block.mark_used();
            state.hits += 1;
            tracing::trace!("ShapePool {}: reused {}", self.key, block.handle());
            return Ok(block.to_pooled());
        }

        if state.blocks.len() >= self.max_blocks {
            return Err(PoolError::PoolExhausted {
                key: self.key.clone(),
                max_blocks: self.max_blocks,
            });
        }

        let buffer = self
            .allocator
            .allocate(self.key.block_size_bytes(), self.key.device)?;
        let mut block = MemoryBlock::new(self.key.clone(), buffer);
        block.mark_used();
        let pooled = block.to_pooled();
        state.blocks.push(block);
        state.misses += 1;

        tracing::debug!(
            "ShapePool {}: allocated {} ({} bytes, {}/{} blocks)",
            self.key,
            pooled.handle(),
            pooled.size_bytes(),
            state.blocks.len(),
            self.max_blocks
        );

        Ok(pooled)
    }

    /// Return a block to the bucket
    ///
    /// Matches by block identity, never by shape. Returns `false` and changes
    /// nothing when the handle is not owned here or the block is already free.
    pub fn release(&self, handle: BlockHandle) -> PoolResult<bool> {
        let mut state = self.state.lock()?;
        match state
            .blocks
            .iter_mut()
            .find(|b| b.handle() == handle && b.in_use())
        {
            Some(block) => {
                block.mark_released();
                tracing::trace!("ShapePool {}: released {}", self.key, handle);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop free blocks untouched for at least `ttl`
    ///
    /// In-use blocks survive regardless of age. Returns how many were removed.
    pub fn evict_stale(&self, ttl: Duration) -> PoolResult<usize> {
        let mut state = self.state.lock()?;
        let now = Instant::now();
        let before = state.blocks.len();
        state.blocks.retain(|b| !b.is_stale(ttl, now));
        let removed = before - state.blocks.len();

        if removed > 0 {
            tracing::debug!("ShapePool {}: evicted {} stale blocks", self.key, removed);
        }
        Ok(removed)
    }

    /// Eagerly allocate up to `count` free blocks, stopping at the cap
    ///
    /// Returns how many blocks were added. An allocation failure stops the
    /// loop and is returned; blocks added before it stay in the bucket.
    pub fn preallocate(&self, count: usize) -> PoolResult<usize> {
        let mut state = self.state.lock()?;
        let room = self.max_blocks.saturating_sub(state.blocks.len());
        let target = count.min(room);

        for _ in 0..target {
            let buffer = self
                .allocator
                .allocate(self.key.block_size_bytes(), self.key.device)?;
            state.blocks.push(MemoryBlock::new(self.key.clone(), buffer));
        }

        if target > 0 {
            tracing::debug!("ShapePool {}: preallocated {} blocks", self.key, target);
        }
        Ok(target)
    }

    /// Drop every free block; in-use blocks are never revoked
    ///
    /// Returns how many blocks were dropped.
    pub fn clear(&self) -> PoolResult<usize> {
        let mut state = self.state.lock()?;
        let before = state.blocks.len();
        state.blocks.retain(|b| b.in_use());
        Ok(before - state.blocks.len())
    }

    pub fn len(&self) -> PoolResult<usize> {
        Ok(self.state.lock()?.blocks.len())
    }

    pub fn is_empty(&self) -> PoolResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn in_use_count(&self) -> PoolResult<usize> {
        Ok(self.state.lock()?.blocks.iter().filter(|b| b.in_use()).count())
    }

    pub fn available_count(&self) -> PoolResult<usize> {
        Ok(self.state.lock()?.blocks.iter().filter(|b| !b.in_use()).count())
    }

    /// Bytes held by every block in the bucket, in use or not
    pub fn total_size_bytes(&self) -> PoolResult<usize> {
        Ok(self
            .state
            .lock()?
            .blocks
            .len()
            .saturating_mul(self.block_size_bytes()))
    }

    pub fn stats(&self) -> PoolResult<BucketStats> {
        let state = self.state.lock()?;
        let total_blocks = state.blocks.len();
        let in_use_blocks = state.blocks.iter().filter(|b| b.in_use()).count();

        Ok(BucketStats {
            shape: self.key.shape.clone(),
            dtype: self.key.dtype,
            device: self.key.device,
            total_blocks,
            available_blocks: total_blocks - in_use_blocks,
            in_use_blocks,
            block_size_bytes: self.block_size_bytes(),
            size_bytes: total_blocks.saturating_mul(self.block_size_bytes()),
            hits: state.hits,
            misses: state.misses,
        })
    }
}

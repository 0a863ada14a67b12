//! Pool manager: bucket routing, budget eviction and release tracking
//!
//! Lock order is always manager state, then a single [`ShapePool`]. The
//! manager lock is dropped before a bucket allocates device memory, so a slow
//! allocation for one key never blocks requests for another.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::block::PooledBlock;
use super::config::PoolConfig;
use super::guard::BlockGuard;
use super::shape_pool::ShapePool;
use super::stats::PoolStats;
use super::types::{BlockHandle, DType, PoolKey};
use crate::backend::{Device, DeviceAllocator};
use crate::error::PoolResult;

#[derive(Debug, Default)]
struct ManagerState {
    pools: HashMap<PoolKey, Arc<ShapePool>>,
    /// Bucket keys, least recently used first
    lru: VecDeque<PoolKey>,
    /// Owning bucket of every block currently handed out
    owners: HashMap<BlockHandle, PoolKey>,
    bucket_evictions: u64,
    stale_evictions: u64,
}

impl ManagerState {
    fn touch(&mut self, key: &PoolKey) {
        if let Some(pos) = self.lru.iter().position(|k| k == key) {
            if let Some(k) = self.lru.remove(pos) {
                self.lru.push_back(k);
            }
        }
    }
}

/// Owns every [`ShapePool`] and enforces the global byte budget
///
/// Build one per process and share it by reference or `Arc`; the
/// [`global`](super::global) module wraps a lazily built instance.
#[derive(Debug)]
pub struct PoolManager {
    config: PoolConfig,
    allocator: Arc<dyn DeviceAllocator>,
    enabled: bool,
    max_pool_size_bytes: usize,
    state: Mutex<ManagerState>,
    bypassed_allocations: AtomicU64,
}

impl PoolManager {
    /// Build a manager and preallocate the configured common shapes
    ///
    /// Pooling is on only when the config enables it and the allocator
    /// reports a usable device. Preallocation failures are logged and skipped.
    pub fn new(config: PoolConfig, allocator: Arc<dyn DeviceAllocator>) -> PoolResult<Self> {
        config.validate()?;

        let available = allocator.is_available();
        let enabled = config.enabled && available;
        if config.enabled && !available {
            tracing::warn!(
                "Allocator '{}' reports no usable device, pooling disabled",
                allocator.name()
            );
        }
        if config.enable_defragmentation {
            tracing::warn!("enable_defragmentation is set but has no effect; blocks are never compacted or split");
        }

        let manager = PoolManager {
            max_pool_size_bytes: config.max_pool_size_bytes(),
            config,
            allocator,
            enabled,
            state: Mutex::new(ManagerState::default()),
            bypassed_allocations: AtomicU64::new(0),
        };

        tracing::info!(
            "PoolManager created: allocator={}, enabled={}, budget={}, max_tensors_per_shape={}, ttl={}s",
            manager.allocator.name(),
            manager.enabled,
            PoolStats::format_bytes(manager.max_pool_size_bytes),
            manager.config.max_tensors_per_shape,
            manager.config.tensor_ttl_seconds
        );

        if manager.enabled {
            let device = manager.config.default_device;
            for (shape, dtype) in &manager.config.preallocate_common_shapes {
                if let Err(e) = manager.preallocate(shape, *dtype, device, 1) {
                    tracing::warn!(
                        "Failed to preallocate {:?}/{}/{}: {}",
                        shape,
                        dtype,
                        device,
                        e
                    );
                }
            }
        }

        Ok(manager)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn allocator(&self) -> &Arc<dyn DeviceAllocator> {
        &self.allocator
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn max_pool_size_bytes(&self) -> usize {
        self.max_pool_size_bytes
    }

    /// Acquire a block of `shape` and `dtype` on `device`
    ///
    /// # Errors
    /// `PoolExhausted` when the bucket is full and every block is in use;
    /// device allocation errors pass through unchanged. Neither is retried.
    pub fn acquire(&self, shape: &[usize], dtype: DType, device: Device) -> PoolResult<PooledBlock> {
        self.acquire_with(shape, dtype, device, None)
    }

    /// Acquire a block and set every element to `value`
    pub fn acquire_filled(
        &self,
        shape: &[usize],
        dtype: DType,
        device: Device,
        value: f64,
    ) -> PoolResult<PooledBlock> {
        self.acquire_with(shape, dtype, device, Some(value))
    }

    fn acquire_with(
        &self,
        shape: &[usize],
        dtype: DType,
        device: Device,
        fill: Option<f64>,
    ) -> PoolResult<PooledBlock> {
        let key = PoolKey::try_new(shape.to_vec(), dtype, device)?;

        if !self.enabled {
            let buffer = self.allocator.allocate(key.block_size_bytes(), device)?;
            self.bypassed_allocations.fetch_add(1, Ordering::Relaxed);
            let block = PooledBlock::unpooled(key, buffer);
            if let Some(value) = fill {
                block.fill(value)?;
            }
            return Ok(block);
        }

        let pool = self.pool_for(&key)?;
        let block = pool.acquire()?;
        let block = self.record_owner(&pool, key, block)?;
        drop(pool);

        if let Some(value) = fill {
            if let Err(e) = block.fill(value) {
                if let Err(release_err) = self.release(block.handle()) {
                    tracing::warn!("Failed to release {} after fill error: {}", block.handle(), release_err);
                }
                return Err(e);
            }
        }

        Ok(block)
    }

    /// Remember which bucket `block` came from so release can find it
    ///
    /// If the manager lock is unusable the block goes straight back to `pool`,
    /// so it is never left in use without an owner entry.
    fn record_owner(&self, pool: &ShapePool, key: PoolKey, block: PooledBlock) -> PoolResult<PooledBlock> {
        match self.state.lock() {
            Ok(mut state) => {
                state.owners.insert(block.handle(), key);
                Ok(block)
            }
            Err(poisoned) => {
                if let Err(e) = pool.release(block.handle()) {
                    tracing::warn!("Failed to return {} to {}: {}", block.handle(), key, e);
                }
                Err(poisoned.into())
            }
        }
    }

    /// Look up or create the bucket for `key` and mark it most recently used
    ///
    /// The returned `Arc` keeps the bucket out of budget eviction until the
    /// caller drops it. `key` must come from [`PoolKey::try_new`].
    fn pool_for(&self, key: &PoolKey) -> PoolResult<Arc<ShapePool>> {
        let new_block_size = key.block_size_bytes();
        let mut state = self.state.lock()?;

        if let Some(pool) = state.pools.get(key) {
            let pool = Arc::clone(pool);
            state.touch(key);
            return Ok(pool);
        }

        self.evict_if_needed(&mut state, new_block_size)?;

        let pool = Arc::new(ShapePool::new(
            key.clone(),
            self.config.max_tensors_per_shape,
            Arc::clone(&self.allocator),
        ));
        state.pools.insert(key.clone(), Arc::clone(&pool));
        state.lru.push_back(key.clone());
        tracing::debug!("Created bucket {}", key);

        Ok(pool)
    }

    /// Remove least recently used idle buckets until `new_block_size` fits
    ///
    /// Buckets with in-use blocks, or with an acquire in flight, are moved to
    /// the most recently used end. Each bucket is examined at most once, so
    /// when every bucket is busy the new allocation goes ahead over budget.
    fn evict_if_needed(&self, state: &mut ManagerState, new_block_size: usize) -> PoolResult<()> {
        let mut current_total = 0usize;
        for pool in state.pools.values() {
            current_total = current_total.saturating_add(pool.total_size_bytes()?);
        }

        let mut candidates = state.lru.len();
        while current_total.saturating_add(new_block_size) > self.max_pool_size_bytes && candidates > 0 {
            candidates -= 1;
            let Some(key) = state.lru.pop_front() else {
                break;
            };

            let busy = match state.pools.get(&key) {
                Some(pool) => pool.in_use_count()? > 0 || Arc::strong_count(pool) > 1,
                None => continue,
            };
            if busy {
                state.lru.push_back(key);
                continue;
            }

            if let Some(pool) = state.pools.remove(&key) {
                let freed = pool.total_size_bytes()?;
                current_total = current_total.saturating_sub(freed);
                state.bucket_evictions += 1;
                tracing::debug!(
                    "Evicted bucket {} ({}) to stay under budget",
                    key,
                    PoolStats::format_bytes(freed)
                );
            }
        }

        if current_total.saturating_add(new_block_size) > self.max_pool_size_bytes {
            tracing::debug!(
                "Budget exceeded with every bucket busy: {} held, {} requested, {} budget",
                current_total,
                new_block_size,
                self.max_pool_size_bytes
            );
        }

        Ok(())
    }

    /// Return a block to its bucket
    ///
    /// `false` when pooling is disabled, the handle was never handed out by
    /// this manager, or it was already released. Nothing changes in that case.
    pub fn release(&self, handle: BlockHandle) -> PoolResult<bool> {
        if !self.enabled {
            return Ok(false);
        }

        let mut state = self.state.lock()?;
        let Some(key) = state.owners.remove(&handle) else {
            return Ok(false);
        };
        match state.pools.get(&key) {
            Some(pool) => pool.release(handle),
            None => Ok(false),
        }
    }

    /// Allocate up to `count` free blocks for a key, within its bucket cap
    ///
    /// Returns how many blocks were added; always 0 while pooling is disabled.
    pub fn preallocate(
        &self,
        shape: &[usize],
        dtype: DType,
        device: Device,
        count: usize,
    ) -> PoolResult<usize> {
        if !self.enabled {
            return Ok(0);
        }
        let key = PoolKey::try_new(shape.to_vec(), dtype, device)?;
        let pool = self.pool_for(&key)?;
        pool.preallocate(count)
    }

    /// Drop free blocks idle for at least `ttl` in every bucket
    pub fn evict_stale(&self, ttl: Duration) -> PoolResult<usize> {
        let mut state = self.state.lock()?;
        let mut removed = 0;
        for pool in state.pools.values() {
            removed += pool.evict_stale(ttl)?;
        }
        state.stale_evictions += removed as u64;

        if removed > 0 {
            tracing::info!("Evicted {} stale blocks (ttl {:?})", removed, ttl);
        }
        Ok(removed)
    }

    /// [`evict_stale`](Self::evict_stale) with the configured TTL
    pub fn evict_expired(&self) -> PoolResult<usize> {
        self.evict_stale(self.config.ttl())
    }

    /// Drop every free block and forget every bucket
    ///
    /// Blocks still in use stay valid for their holders, but releasing them
    /// afterwards returns `false`. Returns how many free blocks were dropped.
    pub fn clear(&self) -> PoolResult<usize> {
        let mut state = self.state.lock()?;
        let mut dropped = 0;
        for pool in state.pools.values() {
            dropped += pool.clear()?;
        }
        let buckets = state.pools.len();
        state.pools.clear();
        state.lru.clear();
        state.owners.clear();

        tracing::info!("Cleared pool: {} buckets, {} free blocks dropped", buckets, dropped);
        Ok(dropped)
    }

    /// Read-only snapshot, buckets listed least recently used first
    pub fn get_stats(&self) -> PoolResult<PoolStats> {
        let state = self.state.lock()?;
        let mut buckets = Vec::with_capacity(state.pools.len());
        for key in &state.lru {
            if let Some(pool) = state.pools.get(key) {
                buckets.push(pool.stats()?);
            }
        }

        let total_size_bytes = buckets
            .iter()
            .fold(0usize, |acc, b| acc.saturating_add(b.size_bytes));
        let utilization = PoolStats::utilization_of(total_size_bytes, self.max_pool_size_bytes);

        Ok(PoolStats {
            enabled: self.enabled,
            bucket_count: buckets.len(),
            total_blocks: buckets.iter().map(|b| b.total_blocks).sum(),
            in_use_blocks: buckets.iter().map(|b| b.in_use_blocks).sum(),
            total_size_bytes,
            max_pool_size_bytes: self.max_pool_size_bytes,
            utilization,
            utilization_percent: utilization * 100.0,
            bucket_evictions: state.bucket_evictions,
            stale_evictions: state.stale_evictions,
            bypassed_allocations: self.bypassed_allocations.load(Ordering::Relaxed),
            buckets,
        })
    }

    pub fn pool_count(&self) -> PoolResult<usize> {
        Ok(self.state.lock()?.pools.len())
    }

    /// Bytes held across all buckets, in use or not
    pub fn total_size_bytes(&self) -> PoolResult<usize> {
        let state = self.state.lock()?;
        let mut total = 0usize;
        for pool in state.pools.values() {
            total = total.saturating_add(pool.total_size_bytes()?);
        }
        Ok(total)
    }

    /// Acquire a block that is released when the guard drops
    pub fn acquire_scoped(
        &self,
        shape: &[usize],
        dtype: DType,
        device: Device,
    ) -> PoolResult<BlockGuard<'_>> {
        let block = self.acquire(shape, dtype, device)?;
        Ok(BlockGuard::new(self, block))
    }

    /// Run `f` with a block, releasing it on return or unwind
    pub fn with_block<F, R>(&self, shape: &[usize], dtype: DType, device: Device, f: F) -> PoolResult<R>
    where
        F: FnOnce(&PooledBlock) -> R,
    {
        let guard = self.acquire_scoped(shape, dtype, device)?;
        Ok(f(&guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DeviceBuffer, HostAllocator};
    use crate::error::PoolError;

    const MB: usize = 1024 * 1024;
    const GPU: Device = Device::Gpu(0);

    /// One MiB of f32
    fn mib_shape(tag: usize) -> Vec<usize> {
        vec![tag, MB / 4 / tag]
    }

    fn manager_with(config: PoolConfig) -> (PoolManager, HostAllocator) {
        let allocator = HostAllocator::new();
        let manager = PoolManager::new(config, Arc::new(allocator.clone())).unwrap();
        (manager, allocator)
    }

    fn small_manager() -> (PoolManager, HostAllocator) {
        manager_with(PoolConfig::default())
    }

    fn bucket_shapes(manager: &PoolManager) -> Vec<Vec<usize>> {
        manager
            .get_stats()
            .unwrap()
            .buckets
            .into_iter()
            .map(|b| b.shape)
            .collect()
    }

    #[derive(Debug)]
    struct NoDeviceAllocator(HostAllocator);

    impl DeviceAllocator for NoDeviceAllocator {
        fn name(&self) -> &'static str {
            "no-device"
        }

        fn is_available(&self) -> bool {
            false
        }

        fn allocate(&self, size_bytes: usize, device: Device) -> PoolResult<DeviceBuffer> {
            self.0.allocate(size_bytes, device)
        }
    }

    #[test]
    fn test_acquire_release_reuses_block() {
        let (manager, allocator) = small_manager();

        let first = manager.acquire(&[4], DType::F32, GPU).unwrap();
        assert!(first.is_pooled());
        assert!(manager.release(first.handle()).unwrap());

        let second = manager.acquire(&[4], DType::F32, GPU).unwrap();
        assert_eq!(second.handle(), first.handle());
        assert_eq!(allocator.total_allocations(), 1);
        assert_eq!(manager.pool_count().unwrap(), 1);
    }

    #[test]
    fn test_keys_are_separate_buckets() {
        let (manager, _allocator) = small_manager();
        manager.acquire(&[4], DType::F32, GPU).unwrap();
        manager.acquire(&[4], DType::F16, GPU).unwrap();
        manager.acquire(&[4], DType::F32, Device::Gpu(1)).unwrap();
        manager.acquire(&[2, 2], DType::F32, GPU).unwrap();
        assert_eq!(manager.pool_count().unwrap(), 4);
    }

    #[test]
    fn test_exhaustion_surfaces_unchanged() {
        let (manager, _allocator) = manager_with(PoolConfig::new().with_max_tensors_per_shape(2));
        manager.acquire(&[4], DType::F32, GPU).unwrap();
        manager.acquire(&[4], DType::F32, GPU).unwrap();

        match manager.acquire(&[4], DType::F32, GPU) {
            Err(PoolError::PoolExhausted { max_blocks, .. }) => assert_eq!(max_blocks, 2),
            other => panic!("expected PoolExhausted, got {:?}", other),
        }
    }

    #[test]
    fn test_release_unknown_and_double_release() {
        let (manager, _allocator) = small_manager();
        let block = manager.acquire(&[8], DType::F32, GPU).unwrap();

        assert!(!manager.release(BlockHandle::next()).unwrap());
        assert!(manager.release(block.handle()).unwrap());
        assert!(!manager.release(block.handle()).unwrap());
        assert_eq!(manager.get_stats().unwrap().in_use_blocks, 0);
    }

    #[test]
    fn test_release_into_other_manager_is_false() {
        let (a, _) = small_manager();
        let (b, _) = small_manager();
        let block = a.acquire(&[8], DType::F32, GPU).unwrap();
        b.acquire(&[8], DType::F32, GPU).unwrap();

        assert!(!b.release(block.handle()).unwrap());
        assert!(a.release(block.handle()).unwrap());
    }

    #[test]
    fn test_lru_bucket_evicted_first() {
        let (manager, allocator) = manager_with(PoolConfig::new().with_max_pool_size_mb(2));

        let a = manager.acquire(&mib_shape(1), DType::F32, GPU).unwrap();
        manager.release(a.handle()).unwrap();
        let b = manager.acquire(&mib_shape(2), DType::F32, GPU).unwrap();
        manager.release(b.handle()).unwrap();
        drop((a, b));

        let c = manager.acquire(&mib_shape(4), DType::F32, GPU).unwrap();
        assert_eq!(bucket_shapes(&manager), vec![mib_shape(2), mib_shape(4)]);
        assert_eq!(manager.get_stats().unwrap().bucket_evictions, 1);
        assert_eq!(allocator.live_allocations(), 2);
        manager.release(c.handle()).unwrap();
    }

    #[test]
    fn test_access_refreshes_lru_position() {
        let (manager, _allocator) = manager_with(PoolConfig::new().with_max_pool_size_mb(2));

        for tag in [1, 2, 1] {
            let block = manager.acquire(&mib_shape(tag), DType::F32, GPU).unwrap();
            manager.release(block.handle()).unwrap();
        }

        // Bucket 1 was touched last, so bucket 2 goes
        manager.acquire(&mib_shape(4), DType::F32, GPU).unwrap();
        assert_eq!(bucket_shapes(&manager), vec![mib_shape(1), mib_shape(4)]);
    }

    #[test]
    fn test_in_use_bucket_skipped() {
        let (manager, _allocator) = manager_with(PoolConfig::new().with_max_pool_size_mb(2));

        let held = manager.acquire(&mib_shape(1), DType::F32, GPU).unwrap();
        let b = manager.acquire(&mib_shape(2), DType::F32, GPU).unwrap();
        manager.release(b.handle()).unwrap();

        manager.acquire(&mib_shape(4), DType::F32, GPU).unwrap();
        let shapes = bucket_shapes(&manager);
        assert!(shapes.contains(&mib_shape(1)));
        assert!(!shapes.contains(&mib_shape(2)));
        assert!(manager.release(held.handle()).unwrap());
    }

    #[test]
    fn test_budget_is_advisory_when_all_busy() {
        let (manager, _allocator) = manager_with(PoolConfig::new().with_max_pool_size_mb(1));

        let a = manager.acquire(&mib_shape(1), DType::F32, GPU).unwrap();
        let b = manager.acquire(&mib_shape(2), DType::F32, GPU).unwrap();
        assert_eq!(manager.pool_count().unwrap(), 2);
        assert!(manager.total_size_bytes().unwrap() > manager.max_pool_size_bytes());

        manager.release(a.handle()).unwrap();
        manager.release(b.handle()).unwrap();
    }

    #[test]
    fn test_budget_restored_once_idle() {
        let (manager, _allocator) = manager_with(PoolConfig::new().with_max_pool_size_mb(2));

        let held: Vec<_> = (1..=3)
            .map(|i| manager.acquire(&mib_shape(1 << i), DType::F32, GPU).unwrap())
            .collect();
        assert_eq!(manager.total_size_bytes().unwrap(), 3 * MB);

        for block in &held {
            manager.release(block.handle()).unwrap();
        }

        let last = manager.acquire(&mib_shape(1), DType::F32, GPU).unwrap();
        assert!(manager.total_size_bytes().unwrap() <= manager.max_pool_size_bytes());
        manager.release(last.handle()).unwrap();
    }

    #[test]
    fn test_disabled_pooling_bypasses() {
        let (manager, allocator) = manager_with(PoolConfig::new().with_enabled(false));
        assert!(!manager.is_enabled());

        let a = manager.acquire(&[16], DType::F32, GPU).unwrap();
        let b = manager.acquire(&[16], DType::F32, GPU).unwrap();
        assert!(!a.is_pooled());
        assert_ne!(a.handle(), b.handle());
        assert!(!a.buffer().ptr_eq(b.buffer()));
        assert_eq!(allocator.total_allocations(), 2);

        assert!(!manager.release(a.handle()).unwrap());
        assert_eq!(manager.pool_count().unwrap(), 0);
        assert_eq!(manager.preallocate(&[16], DType::F32, GPU, 2).unwrap(), 0);

        let stats = manager.get_stats().unwrap();
        assert!(!stats.enabled);
        assert_eq!(stats.bypassed_allocations, 2);

        drop((a, b));
        assert_eq!(allocator.live_allocations(), 0);
    }

    #[test]
    fn test_unavailable_device_disables_pooling() {
        let allocator = HostAllocator::new();
        let manager = PoolManager::new(
            PoolConfig::default(),
            Arc::new(NoDeviceAllocator(allocator.clone())),
        )
        .unwrap();

        assert!(!manager.is_enabled());
        let block = manager.acquire(&[4], DType::F16, GPU).unwrap();
        assert!(!block.is_pooled());
        assert!(!manager.release(block.handle()).unwrap());
    }

    #[test]
    fn test_evict_stale_zero_ttl_removes_everything() {
        let (manager, allocator) = small_manager();

        let blocks = vec![
            manager.acquire(&[4], DType::F32, GPU).unwrap(),
            manager.acquire(&[4], DType::F32, GPU).unwrap(),
            manager.acquire(&[8], DType::F16, GPU).unwrap(),
            manager.acquire(&[2, 2], DType::I32, GPU).unwrap(),
        ];
        for block in &blocks {
            manager.release(block.handle()).unwrap();
        }
        drop(blocks);

        assert_eq!(manager.evict_stale(Duration::ZERO).unwrap(), 4);
        assert_eq!(allocator.live_allocations(), 0);
        assert_eq!(manager.total_size_bytes().unwrap(), 0);
        assert_eq!(manager.get_stats().unwrap().stale_evictions, 4);
    }

    #[test]
    fn test_evict_stale_keeps_in_use() {
        let (manager, _allocator) = small_manager();
        let held = manager.acquire(&[4], DType::F32, GPU).unwrap();
        let free = manager.acquire(&[4], DType::F32, GPU).unwrap();
        manager.release(free.handle()).unwrap();

        assert_eq!(manager.evict_stale(Duration::ZERO).unwrap(), 1);
        assert_eq!(manager.evict_expired().unwrap(), 0);
        assert!(manager.release(held.handle()).unwrap());
    }

    #[test]
    fn test_acquire_filled() {
        let (manager, _allocator) = small_manager();
        let block = manager.acquire_filled(&[3], DType::F32, GPU, 2.5).unwrap();
        let bytes = block.buffer().copy_to_host().unwrap();
        assert_eq!(bytes, [2.5f32.to_le_bytes(); 3].concat());

        let unpooled = manager_with(PoolConfig::new().with_enabled(false)).0;
        let block = unpooled.acquire_filled(&[2], DType::F16, GPU, 1.0).unwrap();
        assert_eq!(block.buffer().copy_to_host().unwrap(), vec![0x00, 0x3c, 0x00, 0x3c]);
    }

    #[test]
    fn test_preallocated_common_shapes() {
        let config = PoolConfig::new()
            .with_preallocated_shape(vec![8], DType::F32)
            .with_preallocated_shape(vec![2, 2], DType::F16);
        let (manager, allocator) = manager_with(config);

        assert_eq!(manager.pool_count().unwrap(), 2);
        assert_eq!(allocator.total_allocations(), 2);
        assert_eq!(manager.get_stats().unwrap().in_use_blocks, 0);

        manager.acquire(&[8], DType::F32, GPU).unwrap();
        assert_eq!(allocator.total_allocations(), 2);
    }

    #[test]
    fn test_preallocation_failure_is_not_fatal() {
        let allocator = HostAllocator::new().with_capacity_limit(16);
        let config = PoolConfig::new()
            .with_preallocated_shape(vec![8], DType::F32)
            .with_preallocated_shape(vec![2], DType::F32);

        let manager = PoolManager::new(config, Arc::new(allocator.clone())).unwrap();
        assert_eq!(allocator.total_allocations(), 1);
        assert_eq!(manager.get_stats().unwrap().total_blocks, 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = PoolManager::new(
            PoolConfig::new().with_max_tensors_per_shape(0),
            Arc::new(HostAllocator::new()),
        );
        assert!(matches!(result, Err(PoolError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_clear_resets_state() {
        let (manager, allocator) = small_manager();
        manager.preallocate(&[4], DType::F32, GPU, 3).unwrap();
        let held = manager.acquire(&[4], DType::F32, GPU).unwrap();

        assert_eq!(manager.clear().unwrap(), 2);
        assert_eq!(manager.pool_count().unwrap(), 0);
        assert!(!manager.release(held.handle()).unwrap());

        // The holder still owns valid memory until it lets go
        assert_eq!(allocator.live_allocations(), 1);
        drop(held);
        assert_eq!(allocator.live_allocations(), 0);
    }

    #[test]
    fn test_scoped_acquisition_releases() {
        let (manager, _allocator) = small_manager();

        {
            let guard = manager.acquire_scoped(&[4], DType::F32, GPU).unwrap();
            assert_eq!(guard.shape(), &[4]);
            assert_eq!(manager.get_stats().unwrap().in_use_blocks, 1);
        }
        assert_eq!(manager.get_stats().unwrap().in_use_blocks, 0);

        let size = manager
            .with_block(&[4], DType::F32, GPU, |block| block.size_bytes())
            .unwrap();
        assert_eq!(size, 16);
        assert_eq!(manager.get_stats().unwrap().in_use_blocks, 0);
    }

    #[test]
    fn test_with_block_releases_on_panic() {
        let (manager, _allocator) = small_manager();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            manager
                .with_block(&[4], DType::F32, GPU, |_| panic!("boom"))
                .unwrap()
        }));
        assert!(result.is_err());
        assert_eq!(manager.get_stats().unwrap().in_use_blocks, 0);
    }

    #[test]
    fn test_stats_snapshot() {
        let (manager, _allocator) = manager_with(PoolConfig::new().with_max_pool_size_mb(1));
        let held = manager.acquire(&[1024], DType::F32, GPU).unwrap();
        let free = manager.acquire(&[1024], DType::F32, GPU).unwrap();
        manager.release(free.handle()).unwrap();

        let stats = manager.get_stats().unwrap();
        assert!(stats.enabled);
        assert_eq!(stats.bucket_count, 1);
        assert_eq!(stats.total_blocks, 2);
        assert_eq!(stats.in_use_blocks, 1);
        assert_eq!(stats.total_size_bytes, 8192);
        assert_eq!(stats.max_pool_size_bytes, MB);
        assert!((stats.utilization_percent - 8192.0 / MB as f64 * 100.0).abs() < 1e-9);

        let bucket = &stats.buckets[0];
        assert_eq!(bucket.available_blocks, 1);
        assert_eq!(bucket.in_use_blocks, 1);
        assert_eq!(bucket.misses, 2);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["buckets"][0]["dtype"], "f32");
        assert_eq!(json["buckets"][0]["device"], "gpu:0");
        assert!(stats.to_string().contains("1 buckets"));

        manager.release(held.handle()).unwrap();
    }

    #[test]
    fn test_defragmentation_flag_is_accepted() {
        let (manager, _allocator) = manager_with(PoolConfig::new().with_defragmentation(true));
        assert!(manager.config().enable_defragmentation);
        let block = manager.acquire(&[4], DType::F32, GPU).unwrap();
        assert!(manager.release(block.handle()).unwrap());
    }

    #[test]
    fn test_owner_lock_failure_returns_block_to_bucket() {
        let (manager, _allocator) = small_manager();
        let key = PoolKey::try_new(vec![4], DType::F32, GPU).unwrap();
        let pool = manager.pool_for(&key).unwrap();
        let block = pool.acquire().unwrap();
        assert_eq!(pool.in_use_count().unwrap(), 1);

        let _ = std::thread::scope(|s| {
            s.spawn(|| {
                let _state = manager.state.lock().unwrap();
                panic!("poison manager state");
            })
            .join()
        });

        let result = manager.record_owner(&pool, key, block);
        assert!(matches!(result, Err(PoolError::LockPoisoned(_))));
        assert_eq!(pool.in_use_count().unwrap(), 0);
        assert_eq!(pool.available_count().unwrap(), 1);
    }

    #[test]
    fn test_overflowing_shape_rejected_before_any_lock() {
        let (manager, allocator) = small_manager();
        let huge = [1usize << 40, 1 << 40];

        assert!(matches!(
            manager.acquire(&huge, DType::F32, GPU),
            Err(PoolError::InvalidShape { .. })
        ));
        assert!(matches!(
            manager.preallocate(&huge, DType::F32, GPU, 1),
            Err(PoolError::InvalidShape { .. })
        ));
        assert_eq!(manager.pool_count().unwrap(), 0);
        assert_eq!(allocator.total_allocations(), 0);

        let block = manager.acquire(&[4], DType::F32, GPU).unwrap();
        assert!(manager.release(block.handle()).unwrap());
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let (manager, allocator) = manager_with(PoolConfig::new().with_max_tensors_per_shape(8));
        let manager = Arc::new(manager);

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || {
                    for round in 0..200 {
                        let shape = [16 * (1 + (i + round) % 2)];
                        let block = manager.acquire(&shape, DType::F32, GPU).unwrap();
                        assert!(manager.release(block.handle()).unwrap());
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let stats = manager.get_stats().unwrap();
        assert_eq!(stats.in_use_blocks, 0);
        assert_eq!(stats.bucket_count, 2);
        assert!(stats.buckets.iter().all(|b| b.total_blocks <= 8));
        assert!(allocator.total_allocations() <= 16);
    }
}

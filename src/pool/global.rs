//! Process-wide pool
//!
//! The first call to any function here builds one [`PoolManager`] from
//! `ROCMPOOL_*` environment variables and the default allocator. Call
//! [`init_global_pool`] before that to inject a config or allocator instead.
//! Code that prefers explicit wiring can ignore this module and pass its own
//! `PoolManager` around.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;

use super::block::PooledBlock;
use super::config::PoolConfig;
use super::guard::BlockGuard;
use super::manager::PoolManager;
use super::stats::PoolStats;
use super::types::DType;
use crate::backend::{default_allocator, Device, DeviceAllocator};
use crate::error::{PoolError, PoolResult};

static GLOBAL_POOL: OnceCell<PoolManager> = OnceCell::new();

/// Install the global pool
///
/// Concurrent callers race on one initialization lock; exactly one manager is
/// built. Everyone else gets `AlreadyInitialized`.
pub fn init_global_pool(
    config: PoolConfig,
    allocator: Arc<dyn DeviceAllocator>,
) -> PoolResult<&'static PoolManager> {
    let mut created = false;
    let manager = GLOBAL_POOL.get_or_try_init(|| {
        created = true;
        PoolManager::new(config, allocator)
    })?;

    if created {
        Ok(manager)
    } else {
        Err(PoolError::AlreadyInitialized)
    }
}

/// The global pool, built from the environment on first use
pub fn global_pool() -> PoolResult<&'static PoolManager> {
    GLOBAL_POOL.get_or_try_init(|| {
        let config = PoolConfig::from_env()?;
        PoolManager::new(config, default_allocator())
    })
}

pub fn is_global_pool_initialized() -> bool {
    GLOBAL_POOL.get().is_some()
}

pub fn acquire(shape: &[usize], dtype: DType, device: Device) -> PoolResult<PooledBlock> {
    global_pool()?.acquire(shape, dtype, device)
}

pub fn acquire_filled(
    shape: &[usize],
    dtype: DType,
    device: Device,
    value: f64,
) -> PoolResult<PooledBlock> {
    global_pool()?.acquire_filled(shape, dtype, device, value)
}

/// Give a block back to the global pool
pub fn release(block: &PooledBlock) -> PoolResult<bool> {
    global_pool()?.release(block.handle())
}

pub fn acquire_scoped(
    shape: &[usize],
    dtype: DType,
    device: Device,
) -> PoolResult<BlockGuard<'static>> {
    global_pool()?.acquire_scoped(shape, dtype, device)
}

/// Run `f` with a block from the global pool, releasing it on every exit path
pub fn with_block<F, R>(shape: &[usize], dtype: DType, device: Device, f: F) -> PoolResult<R>
where
    F: FnOnce(&PooledBlock) -> R,
{
    global_pool()?.with_block(shape, dtype, device, f)
}

pub fn preallocate(shape: &[usize], dtype: DType, device: Device, count: usize) -> PoolResult<usize> {
    global_pool()?.preallocate(shape, dtype, device, count)
}

pub fn evict_stale(ttl: Duration) -> PoolResult<usize> {
    global_pool()?.evict_stale(ttl)
}

/// Staleness eviction with the configured TTL
pub fn evict_expired() -> PoolResult<usize> {
    global_pool()?.evict_expired()
}

pub fn clear_pool() -> PoolResult<usize> {
    global_pool()?.clear()
}

pub fn pool_stats() -> PoolResult<PoolStats> {
    global_pool()?.get_stats()
}

//! rocmpool - shape-bucketed GPU memory pool for AMD GPUs
//!
//! Inference workloads request the same tensor shapes over and over. Instead
//! of a device allocation and free per request, the pool keeps fixed-size
//! blocks bucketed by (shape, element type, device) and hands them back out.
//!
//! ```ignore
//! use rocmpool::{Device, DType, PoolConfig, PoolManager, HostAllocator};
//! use std::sync::Arc;
//!
//! let pool = PoolManager::new(PoolConfig::default(), Arc::new(HostAllocator::new()))?;
//! pool.with_block(&[1, 4096], DType::F16, Device::Gpu(0), |block| {
//!     block.fill(0.0)
//! })??;
//! ```
//!
//! Device memory comes from a [`DeviceAllocator`]: HIP with the `rocm`
//! feature, host memory otherwise.

#![allow(clippy::missing_safety_doc)] // FFI bindings documented at module level

pub mod backend;
pub mod error;
pub mod logging;
pub mod pool;

pub use backend::{default_allocator, Device, DeviceAllocator, DeviceBuffer, HostAllocator};
#[cfg(feature = "rocm")]
pub use backend::HipAllocator;
pub use error::{ErrorCategory, PoolError, PoolResult};
pub use logging::init_logging_default;
pub use pool::{
    global_pool, init_global_pool, BlockGuard, BlockHandle, DType, PoolConfig, PoolKey,
    PoolManager, PoolStats, PooledBlock,
};

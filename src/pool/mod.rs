//! Shape-bucketed device memory pool
//!
//! Blocks are grouped by (shape, element type, device). [`PoolManager`] routes
//! requests to a [`ShapePool`] per key, evicts idle buckets in LRU order to
//! respect a byte budget, and tracks which bucket owns every handed-out block.

pub mod block;
pub mod config;
pub mod global;
pub mod guard;
pub mod manager;
pub mod shape_pool;
pub mod stats;
pub mod types;

pub use block::{MemoryBlock, PooledBlock};
pub use config::PoolConfig;
pub use global::{global_pool, init_global_pool};
pub use guard::BlockGuard;
pub use manager::PoolManager;
pub use shape_pool::ShapePool;
pub use stats::{BucketStats, PoolStats};
pub use types::{BlockHandle, DType, PoolKey};

//! Pool configuration
//!
//! [`PoolConfig`] is passed once to [`PoolManager::new`](super::PoolManager::new).
//! The global pool builds it from the environment:
//!
//! - `ROCMPOOL_MAX_POOL_SIZE_MB`: global byte budget in MiB (default 512)
//! - `ROCMPOOL_MAX_TENSORS_PER_SHAPE`: per-bucket block cap (default 4)
//! - `ROCMPOOL_TENSOR_TTL_SECONDS`: staleness threshold (default 300)
//! - `ROCMPOOL_ENABLE_DEFRAGMENTATION`: accepted, has no effect
//! - `ROCMPOOL_PREALLOCATE_SHAPES`: e.g. `4x4:f32,1024:f16`
//! - `ROCMPOOL_DEVICE`: device for preallocated blocks (default `gpu:0`)
//! - `ROCMPOOL_DISABLE`: `1`, `true` or `yes` turns pooling off

use std::time::Duration;

use super::types::DType;
use crate::backend::Device;
use crate::error::{PoolError, PoolResult};

pub const MAX_POOL_SIZE_MB_ENV: &str = "ROCMPOOL_MAX_POOL_SIZE_MB";
pub const MAX_TENSORS_PER_SHAPE_ENV: &str = "ROCMPOOL_MAX_TENSORS_PER_SHAPE";
pub const TENSOR_TTL_SECONDS_ENV: &str = "ROCMPOOL_TENSOR_TTL_SECONDS";
pub const ENABLE_DEFRAGMENTATION_ENV: &str = "ROCMPOOL_ENABLE_DEFRAGMENTATION";
pub const PREALLOCATE_SHAPES_ENV: &str = "ROCMPOOL_PREALLOCATE_SHAPES";
pub const DEVICE_ENV: &str = "ROCMPOOL_DEVICE";
pub const DISABLE_ENV: &str = "ROCMPOOL_DISABLE";

/// Configuration for the memory pool
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Global budget across all buckets, in MiB
    pub max_pool_size_mb: usize,

    /// Maximum blocks per (shape, element type, device) bucket
    pub max_tensors_per_shape: usize,

    /// Free blocks idle this long are removed by staleness eviction
    pub tensor_ttl_seconds: u64,

    /// Accepted for compatibility; the pool never compacts or splits blocks
    pub enable_defragmentation: bool,

    /// Shapes that get one free block each when the pool is built
    pub preallocate_common_shapes: Vec<(Vec<usize>, DType)>,

    /// Device used for preallocated blocks
    pub default_device: Device,

    /// Pooling on/off; the allocator's capability check can still turn it off
    pub enabled: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_pool_size_mb: 512,
            max_tensors_per_shape: 4,
            tensor_ttl_seconds: 300,
            enable_defragmentation: false,
            preallocate_common_shapes: Vec::new(),
            default_device: Device::Gpu(0),
            enabled: true,
        }
    }
}

impl PoolConfig {
    /// Create a new pool config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `ROCMPOOL_*` environment variables
    pub fn from_env() -> PoolResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable name
    pub fn from_lookup<F>(lookup: F) -> PoolResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(MAX_POOL_SIZE_MB_ENV) {
            config.max_pool_size_mb = parse_number(MAX_POOL_SIZE_MB_ENV, &value)?;
        }
        if let Some(value) = lookup(MAX_TENSORS_PER_SHAPE_ENV) {
            config.max_tensors_per_shape = parse_number(MAX_TENSORS_PER_SHAPE_ENV, &value)?;
        }
        if let Some(value) = lookup(TENSOR_TTL_SECONDS_ENV) {
            config.tensor_ttl_seconds = parse_number(TENSOR_TTL_SECONDS_ENV, &value)?;
        }
        if let Some(value) = lookup(ENABLE_DEFRAGMENTATION_ENV) {
            config.enable_defragmentation = is_truthy(&value);
        }
        if let Some(value) = lookup(PREALLOCATE_SHAPES_ENV) {
            config.preallocate_common_shapes = parse_shape_list(&value)?;
        }
        if let Some(value) = lookup(DEVICE_ENV) {
            config.default_device = value.parse()?;
        }
        if let Some(value) = lookup(DISABLE_ENV) {
            config.enabled = !is_truthy(&value);
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the global budget in MiB
    pub fn with_max_pool_size_mb(mut self, max_pool_size_mb: usize) -> Self {
        self.max_pool_size_mb = max_pool_size_mb;
        self
    }

    /// Set the per-bucket block cap
    pub fn with_max_tensors_per_shape(mut self, max_tensors_per_shape: usize) -> Self {
        self.max_tensors_per_shape = max_tensors_per_shape;
        self
    }

    /// Set the staleness threshold
    pub fn with_tensor_ttl_seconds(mut self, tensor_ttl_seconds: u64) -> Self {
        self.tensor_ttl_seconds = tensor_ttl_seconds;
        self
    }

    pub fn with_defragmentation(mut self, enabled: bool) -> Self {
        self.enable_defragmentation = enabled;
        self
    }

    /// Add a shape to preallocate one block for at construction
    pub fn with_preallocated_shape(mut self, shape: Vec<usize>, dtype: DType) -> Self {
        self.preallocate_common_shapes.push((shape, dtype));
        self
    }

    pub fn with_default_device(mut self, device: Device) -> Self {
        self.default_device = device;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Global budget in bytes
    pub fn max_pool_size_bytes(&self) -> usize {
        self.max_pool_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.tensor_ttl_seconds)
    }

    pub fn validate(&self) -> PoolResult<()> {
        if self.max_tensors_per_shape == 0 {
            return Err(PoolError::InvalidConfiguration(
                "max_tensors_per_shape must be at least 1".to_string(),
            ));
        }
        if self.max_pool_size_mb == 0 {
            return Err(PoolError::InvalidConfiguration(
                "max_pool_size_mb must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> PoolResult<T> {
    value.trim().parse::<T>().map_err(|_| {
        PoolError::InvalidConfiguration(format!("{}: expected a number, got '{}'", name, value))
    })
}

/// Parse `4x4:f32,1024:f16` into (shape, element type) pairs
fn parse_shape_list(value: &str) -> PoolResult<Vec<(Vec<usize>, DType)>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (dims, dtype) = entry.split_once(':').ok_or_else(|| {
                PoolError::InvalidConfiguration(format!(
                    "{}: expected <dims>:<dtype>, got '{}'",
                    PREALLOCATE_SHAPES_ENV, entry
                ))
            })?;
            let shape = dims
                .split('x')
                .map(|d| parse_number::<usize>(PREALLOCATE_SHAPES_ENV, d))
                .collect::<PoolResult<Vec<usize>>>()?;
            Ok((shape, dtype.parse()?))
        })
        .collect()
}

//! Read-only pool statistics for external monitoring

use std::fmt;

use serde::Serialize;

use super::types::DType;
use crate::backend::Device;

/// Snapshot of one shape bucket
#[derive(Debug, Clone, Serialize)]
pub struct BucketStats {
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub device: Device,
    /// Blocks owned by the bucket
    pub total_blocks: usize,
    /// Blocks ready for reuse
    pub available_blocks: usize,
    /// Blocks currently handed out
    pub in_use_blocks: usize,
    /// Bytes per block
    pub block_size_bytes: usize,
    /// Bytes held by the whole bucket
    pub size_bytes: usize,
    /// Acquisitions served by reusing a free block
    pub hits: u64,
    /// Acquisitions that allocated a new block
    pub misses: u64,
}

impl BucketStats {
    /// Fraction of acquisitions served without a device allocation
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Snapshot of the whole pool
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub enabled: bool,
    pub bucket_count: usize,
    pub total_blocks: usize,
    pub in_use_blocks: usize,
    /// Bytes held across all buckets
    pub total_size_bytes: usize,
    /// Configured budget in bytes
    pub max_pool_size_bytes: usize,
    /// `total_size_bytes / max_pool_size_bytes`
    pub utilization: f64,
    pub utilization_percent: f64,
    /// Buckets removed to respect the budget
    pub bucket_evictions: u64,
    /// Blocks removed by staleness eviction
    pub stale_evictions: u64,
    /// Allocations served directly while pooling was disabled
    pub bypassed_allocations: u64,
    pub buckets: Vec<BucketStats>,
}

impl PoolStats {
    pub(crate) fn utilization_of(total: usize, budget: usize) -> f64 {
        if budget == 0 {
            if total == 0 {
                0.0
            } else {
                1.0
            }
        } else {
            total as f64 / budget as f64
        }
    }

    /// Format bytes as human readable
    pub fn format_bytes(bytes: usize) -> String {
        const KB: usize = 1024;
        const MB: usize = 1024 * 1024;
        const GB: usize = 1024 * 1024 * 1024;

        if bytes >= GB {
            format!("{:.2} GB", bytes as f64 / GB as f64)
        } else if bytes >= MB {
            format!("{:.2} MB", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            format!("{:.2} KB", bytes as f64 / KB as f64)
        } else {
            format!("{} B", bytes)
        }
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Memory pool ({})", if self.enabled { "enabled" } else { "disabled" })?;
        writeln!(
            f,
            "  Usage:     {} / {} ({:.1}%)",
            Self::format_bytes(self.total_size_bytes),
            Self::format_bytes(self.max_pool_size_bytes),
            self.utilization_percent
        )?;
        writeln!(
            f,
            "  Blocks:    {} total, {} in use, {} buckets",
            self.total_blocks, self.in_use_blocks, self.bucket_count
        )?;
        writeln!(
            f,
            "  Evictions: {} buckets, {} stale blocks",
            self.bucket_evictions, self.stale_evictions
        )?;
        for bucket in &self.buckets {
            writeln!(
                f,
                "    {:?}/{}/{}: {} blocks ({} free, {} in use), {}, hit rate {:.1}%",
                bucket.shape,
                bucket.dtype,
                bucket.device,
                bucket.total_blocks,
                bucket.available_blocks,
                bucket.in_use_blocks,
                Self::format_bytes(bucket.size_bytes),
                bucket.hit_rate() * 100.0
            )?;
        }
        Ok(())
    }
}

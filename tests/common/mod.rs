//! Shared fixtures for pool integration tests
//!
//! Host-backed helpers always compile. The HIP fixture needs the `rocm`
//! feature and is `None` when no GPU is usable, so GPU tests skip instead of
//! failing on machines without ROCm.

#![allow(dead_code)]

use std::sync::Arc;

use rocmpool::{HostAllocator, PoolConfig, PoolManager};

pub const MB: usize = 1024 * 1024;

/// Manager over a fresh host allocator; the returned clone shares its counters
pub fn host_pool(config: PoolConfig) -> (PoolManager, HostAllocator) {
    rocmpool::init_logging_default();
    let allocator = HostAllocator::new();
    let manager = PoolManager::new(config, Arc::new(allocator.clone()))
        .expect("host pool construction failed");
    (manager, allocator)
}

/// A 2-D shape holding exactly 1 MiB of f32; `tag` must divide 262144
pub fn mib_shape(tag: usize) -> Vec<usize> {
    vec![tag, MB / 4 / tag]
}

#[cfg(feature = "rocm")]
pub use hip::{HipTestFixture, HIP_FIXTURE};

#[cfg(feature = "rocm")]
mod hip {
    use once_cell::sync::Lazy;
    use rocmpool::{Device, DeviceAllocator, HipAllocator};

    /// Initialized once per test binary
    pub static HIP_FIXTURE: Lazy<Option<HipTestFixture>> = Lazy::new(|| {
        let allocator = HipAllocator::new();
        if !allocator.is_available() {
            eprintln!("WARNING: HIP device not available - skipping GPU pool tests");
            return None;
        }

        match allocator.memory_info(Device::Gpu(0)) {
            Ok((free, total)) => {
                eprintln!(
                    "HIP fixture: {} devices, {} MB free of {} MB",
                    HipAllocator::device_count(),
                    free / 1024 / 1024,
                    total / 1024 / 1024
                );
                Some(HipTestFixture {
                    allocator,
                    initial_free: free,
                })
            }
            Err(e) => {
                eprintln!("ERROR: failed to query GPU memory: {}", e);
                None
            }
        }
    });

    pub struct HipTestFixture {
        allocator: HipAllocator,
        initial_free: usize,
    }

    impl HipTestFixture {
        pub fn allocator(&self) -> HipAllocator {
            self.allocator
        }

        /// Panics if free device memory dropped by more than `tolerance_percent`
        pub fn assert_no_leak(&self, tolerance_percent: usize) {
            let (free, _total) = self
                .allocator
                .memory_info(Device::Gpu(0))
                .expect("failed to query GPU memory");
            let leaked = self.initial_free.saturating_sub(free);
            let tolerance = self.initial_free / 100 * tolerance_percent;
            assert!(
                leaked <= tolerance,
                "GPU memory leak: {} bytes not returned (tolerance {} bytes)",
                leaked,
                tolerance
            );
        }
    }
}

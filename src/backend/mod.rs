//! Device backends the pool allocates from
//!
//! The pool only sees the [`DeviceAllocator`] trait. [`HostAllocator`] is
//! always compiled; [`HipAllocator`] requires the `rocm` feature.

pub mod allocator;
pub mod device;
#[cfg(feature = "rocm")]
pub mod hip_backend;
pub mod host;

pub use allocator::{DeviceAllocator, DeviceBuffer, DeviceMemory};
pub use device::Device;
#[cfg(feature = "rocm")]
pub use hip_backend::HipAllocator;
pub use host::HostAllocator;

use std::sync::Arc;

/// Allocator used when none is injected: HIP under `rocm`, host memory otherwise
pub fn default_allocator() -> Arc<dyn DeviceAllocator> {
    #[cfg(feature = "rocm")]
    {
        Arc::new(HipAllocator::new())
    }
    #[cfg(not(feature = "rocm"))]
    {
        Arc::new(HostAllocator::new())
    }
}

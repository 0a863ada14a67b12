//! ROCm/HIP device allocator
//!
//! Serves pool blocks from `hipMalloc` and frees them with `hipFree` when the
//! last [`DeviceBuffer`](crate::backend::DeviceBuffer) reference drops.

mod ffi;
mod memory;

pub use memory::HipAllocator;

//! HIP device memory for pool blocks

use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

use super::ffi;
use crate::backend::{Device, DeviceAllocator, DeviceBuffer, DeviceMemory};
use crate::error::{PoolError, PoolResult};

// SAFETY: HipMemory only holds a device pointer. The HIP runtime is
// thread-safe for malloc/free/memcpy, and the pointer is never dereferenced
// on the host.
unsafe impl Send for HipMemory {}
unsafe impl Sync for HipMemory {}

#[derive(Debug)]
struct HipMemory {
    ptr: *mut c_void,
    size: usize,
    ordinal: u32,
}

fn select_device(ordinal: u32) -> PoolResult<()> {
    let result = unsafe { ffi::hipSetDevice(ordinal as i32) };
    if result != ffi::HIP_SUCCESS {
        return Err(PoolError::DeviceNotFound(format!(
            "hipSetDevice({}) failed with code {}",
            ordinal, result
        )));
    }
    Ok(())
}

impl DeviceMemory for HipMemory {
    fn size(&self) -> usize {
        self.size
    }

    fn device(&self) -> Device {
        Device::Gpu(self.ordinal)
    }

    fn fill_bytes(&self, pattern: &[u8]) -> PoolResult<()> {
        if pattern.is_empty() {
            return Err(PoolError::MemoryCopyFailed(
                "fill pattern cannot be empty".to_string(),
            ));
        }
        if self.size == 0 {
            return Ok(());
        }
        select_device(self.ordinal)?;

        // Uniform byte patterns (zeros, 0xff) go through hipMemset
        let first = pattern[0];
        let result = if pattern.iter().all(|&b| b == first) {
            unsafe { ffi::hipMemset(self.ptr, first as i32, self.size) }
        } else {
            let host: Vec<u8> = pattern.iter().copied().cycle().take(self.size).collect();
            unsafe {
                ffi::hipMemcpy(
                    self.ptr,
                    host.as_ptr() as *const c_void,
                    self.size,
                    ffi::HIP_MEMCPY_HOST_TO_DEVICE,
                )
            }
        };

        if result != ffi::HIP_SUCCESS {
            return Err(PoolError::MemoryCopyFailed(format!(
                "fill failed with code {} (ptr={:?}, size={})",
                result, self.ptr, self.size
            )));
        }
        Ok(())
    }

    fn copy_to_host(&self) -> PoolResult<Vec<u8>> {
        let mut host = vec![0u8; self.size];
        if self.size == 0 {
            return Ok(host);
        }
        select_device(self.ordinal)?;

        let result = unsafe {
            ffi::hipMemcpy(
                host.as_mut_ptr() as *mut c_void,
                self.ptr,
                self.size,
                ffi::HIP_MEMCPY_DEVICE_TO_HOST,
            )
        };
        if result != ffi::HIP_SUCCESS {
            return Err(PoolError::MemoryCopyFailed(format!(
                "hipMemcpyDtoH failed with code {} (ptr={:?}, size={})",
                result, self.ptr, self.size
            )));
        }
        Ok(host)
    }
}

impl Drop for HipMemory {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        if select_device(self.ordinal).is_err() {
            tracing::warn!("HipMemory::drop: could not select gpu:{}, leaking {:?}", self.ordinal, self.ptr);
            return;
        }
        let result = unsafe { ffi::hipFree(self.ptr) };
        if result != ffi::HIP_SUCCESS {
            tracing::warn!("hipFree failed with code {} for {:?}", result, self.ptr);
        }
    }
}

/// Allocator backed by the HIP runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct HipAllocator;

impl HipAllocator {
    pub fn new() -> Self {
        HipAllocator
    }

    /// Number of visible HIP devices (0 when the runtime is unusable)
    pub fn device_count() -> usize {
        let mut count: i32 = 0;
        let result = unsafe { ffi::hipGetDeviceCount(&mut count) };
        if result != ffi::HIP_SUCCESS || count < 0 {
            return 0;
        }
        count as usize
    }

    /// Free and total memory in bytes on `device`
    pub fn memory_info(&self, device: Device) -> PoolResult<(usize, usize)> {
        let ordinal = self.gpu_ordinal(device)?;
        select_device(ordinal)?;
        let mut free: usize = 0;
        let mut total: usize = 0;
        let result = unsafe { ffi::hipMemGetInfo(&mut free, &mut total) };
        if result != ffi::HIP_SUCCESS {
            return Err(PoolError::DeviceNotFound(format!(
                "hipMemGetInfo failed with code {} on {}",
                result, device
            )));
        }
        Ok((free, total))
    }

    fn gpu_ordinal(&self, device: Device) -> PoolResult<u32> {
        match device {
            Device::Gpu(ordinal) if (ordinal as usize) < Self::device_count() => Ok(ordinal),
            _ => Err(PoolError::DeviceNotFound(format!(
                "HIP allocator cannot serve {}",
                device
            ))),
        }
    }
}

impl DeviceAllocator for HipAllocator {
    fn name(&self) -> &'static str {
        "hip"
    }

    /// Checked once per process; a missing or broken runtime reads as unavailable
    fn is_available(&self) -> bool {
        static AVAILABLE: AtomicBool = AtomicBool::new(false);
        static INIT: Once = Once::new();

        INIT.call_once(|| {
            let result = std::panic::catch_unwind(|| unsafe {
                if ffi::hipInit(0) != ffi::HIP_SUCCESS {
                    return false;
                }
                let mut count: i32 = 0;
                ffi::hipGetDeviceCount(&mut count) == ffi::HIP_SUCCESS && count > 0
            });
            AVAILABLE.store(result.unwrap_or(false), Ordering::Release);
        });

        AVAILABLE.load(Ordering::Acquire)
    }

    fn allocate(&self, size_bytes: usize, device: Device) -> PoolResult<DeviceBuffer> {
        let ordinal = self.gpu_ordinal(device)?;

        if size_bytes == 0 {
            return Ok(DeviceBuffer::new(HipMemory {
                ptr: ptr::null_mut(),
                size: 0,
                ordinal,
            }));
        }
        if size_bytes > 1024 * 1024 * 1024 {
            tracing::warn!("HipAllocator: large block requested: {} MB", size_bytes / (1024 * 1024));
        }

        select_device(ordinal)?;
        let mut ptr: *mut c_void = ptr::null_mut();
        let result = unsafe { ffi::hipMalloc(&mut ptr, size_bytes) };

        if result != ffi::HIP_SUCCESS {
            tracing::error!("hipMalloc failed with code {} for {} bytes on {}", result, size_bytes, device);
            return Err(PoolError::DeviceAllocationFailed(format!(
                "hipMalloc failed with code {} for {} bytes on {}",
                result, size_bytes, device
            )));
        }
        if ptr.is_null() {
            return Err(PoolError::DeviceAllocationFailed(format!(
                "hipMalloc returned null pointer for {} bytes on {}",
                size_bytes, device
            )));
        }

        tracing::debug!("HipAllocator: allocated {} bytes at {:?} on {}", size_bytes, ptr, device);
        Ok(DeviceBuffer::new(HipMemory {
            ptr,
            size: size_bytes,
            ordinal,
        }))
    }
}

//! Unified error handling for rocmpool
//!
//! Every fallible pool operation returns [`PoolResult`]. The taxonomy is small:
//! - Recoverable: a shape bucket is at its cap with every block in use
//! - Backend: the device allocator failed (out of memory, missing device, copy failure)
//! - User: invalid configuration, an unrepresentable shape or a second global
//!   initialisation
//! - Internal: a lock was poisoned by a panicking holder
//!
//! Releasing a handle the pool does not know is NOT an error; release
//! operations report that as `Ok(false)`.

use std::fmt;

use crate::pool::{DType, PoolKey};

/// Unified error type for the pool and its device allocators
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    // ========== Pool Errors ==========
    /// Every block of a bucket is in use and the bucket is at its cap
    #[error("Pool exhausted for {key}: all {max_blocks} blocks in use")]
    PoolExhausted { key: PoolKey, max_blocks: usize },

    /// Block size for this shape does not fit in `usize`
    #[error("Invalid shape {shape:?} for {dtype}: block size overflows")]
    InvalidShape { shape: Vec<usize>, dtype: DType },

    // ========== Backend Errors ==========
    /// Device memory allocation failed
    #[error("Device memory allocation failed: {0}")]
    DeviceAllocationFailed(String),

    /// Device not found or not usable by this allocator
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Host/device copy or memset failed
    #[error("Memory copy failed: {0}")]
    MemoryCopyFailed(String),

    // ========== Configuration Errors ==========
    /// Invalid pool configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The process-wide pool was already created
    #[error("Global memory pool already initialized")]
    AlreadyInitialized,

    // ========== Internal Errors ==========
    /// Lock poisoned (a thread panicked while holding pool state)
    #[error("Internal lock poisoned - this indicates a bug: {0}")]
    LockPoisoned(String),
}

impl PoolError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            PoolError::PoolExhausted { .. } => ErrorCategory::Recoverable,

            PoolError::DeviceAllocationFailed(_)
            | PoolError::DeviceNotFound(_)
            | PoolError::MemoryCopyFailed(_) => ErrorCategory::Backend,

            PoolError::InvalidConfiguration(_)
            | PoolError::InvalidShape { .. }
            | PoolError::AlreadyInitialized => ErrorCategory::User,

            PoolError::LockPoisoned(_) => ErrorCategory::Internal,
        }
    }

    /// Check if this error is recoverable (temporary condition)
    ///
    /// Exhaustion clears once blocks are released; allocation failures may
    /// succeed after other memory is freed. The pool itself never retries.
    pub fn is_recoverable(&self) -> bool {
        match self {
            PoolError::PoolExhausted { .. } | PoolError::DeviceAllocationFailed(_) => true,
            _ => false,
        }
    }

    /// Check if this is a user-facing error (actionable by users)
    pub fn is_user_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::User)
    }

    /// Check if this is an internal error (indicates a bug)
    pub fn is_internal_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }
}

/// Error category for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid input or configuration
    User,
    /// Temporary condition, the caller may release blocks and retry
    Recoverable,
    /// Device allocator failure
    Backend,
    /// Indicates a bug
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "User"),
            ErrorCategory::Recoverable => write!(f, "Recoverable"),
            ErrorCategory::Backend => write!(f, "Backend"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for PoolError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        PoolError::LockPoisoned(format!("Lock poisoned: {}", err))
    }
}

/// Result type for pool operations
pub type PoolResult<T> = std::result::Result<T, PoolError>;

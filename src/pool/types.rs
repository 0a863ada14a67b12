//! Core pool types: element types, bucket keys and block identities

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::backend::Device;
use crate::error::{PoolError, PoolResult};

/// Element type of a pooled block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F32,
    F16,
    BF16,
    F64,
    I8,
    U8,
    I16,
    I32,
    I64,
    Bool,
}

impl DType {
    /// Bytes per element
    pub fn size_bytes(self) -> usize {
        match self {
            DType::F64 | DType::I64 => 8,
            DType::F32 | DType::I32 => 4,
            DType::F16 | DType::BF16 | DType::I16 => 2,
            DType::I8 | DType::U8 | DType::Bool => 1,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F16 | DType::BF16 | DType::F64)
    }

    /// Little-endian bytes of one element holding `value`
    ///
    /// Integer conversions saturate; `Bool` is true for any non-zero value.
    pub fn encode_scalar(self, value: f64) -> Vec<u8> {
        match self {
            DType::F32 => (value as f32).to_le_bytes().to_vec(),
            DType::F16 => half::f16::from_f64(value).to_le_bytes().to_vec(),
            DType::BF16 => half::bf16::from_f64(value).to_le_bytes().to_vec(),
            DType::F64 => value.to_le_bytes().to_vec(),
            DType::I8 => (value as i8).to_le_bytes().to_vec(),
            DType::U8 => vec![value as u8],
            DType::I16 => (value as i16).to_le_bytes().to_vec(),
            DType::I32 => (value as i32).to_le_bytes().to_vec(),
            DType::I64 => (value as i64).to_le_bytes().to_vec(),
            DType::Bool => vec![(value != 0.0) as u8],
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::F64 => "f64",
            DType::I8 => "i8",
            DType::U8 => "u8",
            DType::I16 => "i16",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::Bool => "bool",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "f32" | "float32" | "float" => Ok(DType::F32),
            "f16" | "float16" | "half" => Ok(DType::F16),
            "bf16" | "bfloat16" => Ok(DType::BF16),
            "f64" | "float64" | "double" => Ok(DType::F64),
            "i8" | "int8" => Ok(DType::I8),
            "u8" | "uint8" => Ok(DType::U8),
            "i16" | "int16" => Ok(DType::I16),
            "i32" | "int32" | "int" => Ok(DType::I32),
            "i64" | "int64" | "long" => Ok(DType::I64),
            "bool" => Ok(DType::Bool),
            _ => Err(PoolError::InvalidConfiguration(format!(
                "unrecognized element type '{}'",
                s
            ))),
        }
    }
}

/// Bucket key: blocks are interchangeable only when all three parts match
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub device: Device,
}

impl PoolKey {
    pub fn new(shape: Vec<usize>, dtype: DType, device: Device) -> Self {
        PoolKey {
            shape,
            dtype,
            device,
        }
    }

    /// Key for a block whose byte size fits in `usize`
    pub fn try_new(shape: Vec<usize>, dtype: DType, device: Device) -> PoolResult<Self> {
        let key = PoolKey::new(shape, dtype, device);
        match key.checked_block_size_bytes() {
            Some(_) => Ok(key),
            None => Err(PoolError::InvalidShape {
                shape: key.shape,
                dtype,
            }),
        }
    }

    /// Number of elements (1 for a scalar shape), saturating at `usize::MAX`
    pub fn element_count(&self) -> usize {
        if self.shape.contains(&0) {
            return 0;
        }
        self.shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .unwrap_or(usize::MAX)
    }

    /// Bytes in one block, `None` on overflow
    pub fn checked_block_size_bytes(&self) -> Option<usize> {
        if self.shape.contains(&0) {
            return Some(0);
        }
        self.shape
            .iter()
            .try_fold(self.dtype.size_bytes(), |acc, &d| acc.checked_mul(d))
    }

    /// Bytes in one block of this key, saturating at `usize::MAX`
    pub fn block_size_bytes(&self) -> usize {
        self.checked_block_size_bytes().unwrap_or(usize::MAX)
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{}/{}", self.shape, self.dtype, self.device)
    }
}

static NEXT_BLOCK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one allocated block
///
/// Assigned at allocation time and never reused, so two blocks with the same
/// shape and element type are still told apart on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockHandle(u64);

impl BlockHandle {
    pub(crate) fn next() -> Self {
        BlockHandle(NEXT_BLOCK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BlockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block#{}", self.0)
    }
}

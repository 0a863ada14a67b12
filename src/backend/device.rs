//! Device identifiers

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::PoolError;

/// Device a block lives on
///
/// Displays as `cpu` or `gpu:N`. Parsing also accepts `cuda:N` and `hip:N`
/// as aliases, and a bare `gpu` / `cuda` / `hip` for ordinal 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Device {
    /// Host memory
    Cpu,
    /// GPU by ordinal
    Gpu(u32),
}

impl Device {
    /// GPU ordinal, `None` for the host
    pub fn ordinal(&self) -> Option<u32> {
        match self {
            Device::Cpu => None,
            Device::Gpu(ordinal) => Some(*ordinal),
        }
    }

    pub fn is_gpu(&self) -> bool {
        matches!(self, Device::Gpu(_))
    }
}

impl Default for Device {
    fn default() -> Self {
        Device::Gpu(0)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Gpu(ordinal) => write!(f, "gpu:{}", ordinal),
        }
    }
}

impl FromStr for Device {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        let (kind, ordinal) = match normalized.split_once(':') {
            Some((kind, ordinal)) => (kind, Some(ordinal)),
            None => (normalized.as_str(), None),
        };

        match (kind, ordinal) {
            ("cpu", None) => Ok(Device::Cpu),
            ("gpu" | "cuda" | "hip", None) => Ok(Device::Gpu(0)),
            ("gpu" | "cuda" | "hip", Some(ordinal)) => ordinal
                .parse::<u32>()
                .map(Device::Gpu)
                .map_err(|_| {
                    PoolError::InvalidConfiguration(format!("invalid device ordinal in '{}'", s))
                }),
            _ => Err(PoolError::InvalidConfiguration(format!(
                "unrecognized device '{}'",
                s
            ))),
        }
    }
}

impl Serialize for Device {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

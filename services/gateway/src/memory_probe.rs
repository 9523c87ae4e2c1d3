use parking_lot::Mutex;
use sysinfo::System;
use thiserror::Error;
use tracing::debug;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// One reading of host memory statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    /// Memory available for new allocations
    pub free_bytes: u64,
    /// Physical memory installed
    pub total_bytes: u64,
}

impl MemorySample {
    /// Fraction of total memory currently in use
    pub fn usage_ratio(&self) -> f64 {
        1.0 - self.free_bytes as f64 / self.total_bytes as f64
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("memory statistics are not supported on this host")]
    Unsupported,

    #[error("host reported zero total memory")]
    ZeroTotal,
}

/// Source of host memory statistics
#[cfg_attr(test, mockall::automock)]
pub trait MemoryProbe: Send + Sync {
    fn sample(&self) -> Result<MemorySample, ProbeError>;
}

/// Memory probe backed by the OS via sysinfo
pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoProbe {
    fn sample(&self) -> Result<MemorySample, ProbeError> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(ProbeError::Unsupported);
        }

        let mut system = self.system.lock();
        system.refresh_memory();

        let sample = MemorySample {
            // "available" counts reclaimable cache, which is what callers mean by free
            free_bytes: system.available_memory(),
            total_bytes: system.total_memory(),
        };

        if sample.total_bytes == 0 {
            return Err(ProbeError::ZeroTotal);
        }

        debug!(
            free_mb = sample.free_bytes / BYTES_PER_MB,
            total_mb = sample.total_bytes / BYTES_PER_MB,
            usage_percent = sample.usage_ratio() * 100.0,
            "Sampled host memory"
        );

        Ok(sample)
    }
}

use crate::config::StorageConfig;
use crate::memory_probe::MemoryProbe;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where an upload is buffered while it is being relayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Held as an in-process byte buffer
    Memory,
    /// Streamed to a file in the uploads directory
    Disk,
}

impl StorageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::Memory => "memory",
            StorageMode::Disk => "disk",
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Picks the buffering mode for each upload from its declared size and the
/// current host memory pressure.
///
/// The declared size is advisory; the receiver enforces the real limits no
/// matter which mode is chosen here. When memory statistics cannot be read
/// the selector favors stability and picks [`StorageMode::Disk`].
pub struct StorageSelector {
    probe: Arc<dyn MemoryProbe>,
    memory_threshold: f64,
    disk_fallback_size: u64,
}

impl StorageSelector {
    pub fn new(probe: Arc<dyn MemoryProbe>, config: &StorageConfig) -> Self {
        Self {
            probe,
            memory_threshold: config.memory_threshold,
            disk_fallback_size: config.disk_fallback_size_bytes,
        }
    }

    /// Decide the buffering mode for an upload of `declared_size` bytes
    pub fn decide(&self, declared_size: u64) -> StorageMode {
        let usage_ratio = match self.probe.sample() {
            Ok(sample) => sample.usage_ratio(),
            Err(e) => {
                warn!(error = %e, "Memory probe failed, falling back to disk buffering");
                metrics::counter!("gateway.memory_probe.failed").increment(1);
                return StorageMode::Disk;
            }
        };

        let mode = select_mode(
            declared_size,
            usage_ratio,
            self.memory_threshold,
            self.disk_fallback_size,
        );

        debug!(
            declared_size = declared_size,
            usage_ratio = usage_ratio,
            mode = %mode,
            "Selected storage mode"
        );

        mode
    }
}

/// Both comparisons are strict: values sitting exactly on a threshold stay in memory.
fn select_mode(
    declared_size: u64,
    usage_ratio: f64,
    memory_threshold: f64,
    disk_fallback_size: u64,
) -> StorageMode {
    if declared_size > disk_fallback_size || usage_ratio > memory_threshold {
        StorageMode::Disk
    } else {
        StorageMode::Memory
    }
}

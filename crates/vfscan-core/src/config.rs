//! Tunables of a scan run

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};
use crate::vfs::DriverLimits;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Bytes read per orchestrator step
    pub chunk_size: usize,
    /// Files larger than this are not scanned at all
    pub max_file_size: u64,
    /// Files split into more extents than this are not scanned at all
    pub max_extents: usize,
    /// Bytes of the next unit appended to the slack pass
    pub slack_overread: usize,
    /// Deepest chain of derived segments that is still expanded
    pub max_depth: usize,
    /// Largest container member buffered in memory
    pub max_member_size: u64,
    /// Worker threads, rayon's default when unset
    pub workers: Option<usize>,
    /// Scratch directory for materialised containers
    pub temp_dir: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            max_file_size: 100_000_000,
            max_extents: 1000,
            slack_overread: 200,
            max_depth: 16,
            max_member_size: 256 * 1024 * 1024,
            workers: None,
            temp_dir: None,
        }
    }
}

impl ScanConfig {
    /// Load from a JSON file. Missing fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: ScanConfig = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ScanError::Config("chunk_size must be positive".into()));
        }
        if self.workers == Some(0) {
            return Err(ScanError::Config("workers must be positive".into()));
        }
        Ok(())
    }

    pub fn driver_limits(&self) -> DriverLimits {
        DriverLimits {
            max_member_size: self.max_member_size,
        }
    }
}

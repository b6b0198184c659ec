//! Cache configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::tools::ToolPaths;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Cache configuration, loaded from JSON. Missing fields take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding published renditions.
    pub cache_path: PathBuf,
    /// Parent of the per-job `mcs-*` scratch directories. OS temp dir when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_path: Option<PathBuf>,
    /// Slots in the image-like pool.
    pub threads: usize,
    pub tools: ToolPaths,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_path: PathBuf::from("cache"),
            scratch_path: None,
            threads: default_threads(),
            tools: ToolPaths::default(),
        }
    }
}

impl CacheConfig {
    pub fn new(cache_path: impl Into<PathBuf>) -> Self {
        Self {
            cache_path: cache_path.into(),
            ..Self::default()
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_path.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn image_capacity(&self) -> usize {
        self.threads.max(1)
    }
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

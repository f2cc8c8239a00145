//! Configuration for annotation-store

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("annotation-store")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory for both tiers
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Capacity of the primary tier in bytes (0 = unbounded)
    #[serde(default = "default_primary_quota")]
    pub primary_quota_bytes: u64,

    /// Page cache handed to sled
    #[serde(default = "default_sled_cache")]
    pub sled_cache_bytes: u64,
}

/// Matches the per-origin quota browsers give local storage
fn default_primary_quota() -> u64 {
    5 * 1024 * 1024
}

fn default_sled_cache() -> u64 {
    16 * 1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            primary_quota_bytes: default_primary_quota(),
            sled_cache_bytes: default_sled_cache(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| StorageError::Config(e.to_string()))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), StorageError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| StorageError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get primary tier database path
    pub fn primary_db_path(&self) -> PathBuf {
        self.storage_dir.join("primary.sled")
    }

    /// Get fallback tier directory
    pub fn fallback_dir(&self) -> PathBuf {
        self.storage_dir.join("fallback")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    /// Quota as the backends expect it
    pub fn primary_quota(&self) -> Option<u64> {
        (self.primary_quota_bytes > 0).then_some(self.primary_quota_bytes)
    }
}

//! Persistent primary tier on sled

use super::{entry_size, KvBackend};
use crate::error::StorageError;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// sled-backed tier with an optional byte quota
pub struct SledBackend {
    db: sled::Db,
    entries: sled::Tree,
    quota: Option<u64>,
    used: AtomicU64,
}

impl SledBackend {
    /// Open or create the database at `path`
    pub fn open<P: AsRef<Path>>(
        path: P,
        cache_bytes: u64,
        quota: Option<u64>,
    ) -> Result<Self, StorageError> {
        let db = sled::Config::new()
            .path(path.as_ref())
            .cache_capacity(cache_bytes)
            .open()?;
        Self::from_db(db, quota)
    }

    /// Throwaway database for tests
    pub fn temporary(quota: Option<u64>) -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, quota)
    }

    fn from_db(db: sled::Db, quota: Option<u64>) -> Result<Self, StorageError> {
        let entries = db.open_tree("entries")?;

        let mut used = 0u64;
        for item in entries.iter() {
            let (key, value) = item?;
            used += (key.len() + value.len()) as u64;
        }

        info!(entries = entries.len(), used_bytes = used, quota = ?quota, "Opened primary tier");

        Ok(Self {
            db,
            entries,
            quota,
            used: AtomicU64::new(used),
        })
    }

    /// Bytes currently charged against the quota
    pub fn used_bytes(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    /// Flush dirty pages to disk
    pub async fn flush(&self) -> Result<(), StorageError> {
        self.db.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl KvBackend for SledBackend {
    fn name(&self) -> &'static str {
        "sled"
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let needed = entry_size(key, value.len());
        let previous = self
            .entries
            .get(key.as_bytes())?
            .map(|old| entry_size(key, old.len()))
            .unwrap_or(0);

        if let Some(quota) = self.quota {
            let used = self.used_bytes().saturating_sub(previous);
            if used + needed > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    available: quota.saturating_sub(used),
                });
            }
        }

        self.entries.insert(key.as_bytes(), value)?;
        self.used.fetch_add(needed, Ordering::AcqRel);
        self.used.fetch_sub(previous, Ordering::AcqRel);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.get(key.as_bytes())?.map(|value| value.to_vec()))
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        if let Some(old) = self.entries.remove(key.as_bytes())? {
            self.used
                .fetch_sub(entry_size(key, old.len()), Ordering::AcqRel);
        }
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.contains_key(key.as_bytes())?)
    }
}

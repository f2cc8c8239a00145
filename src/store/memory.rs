//! In-memory tier backed by a `DashMap`

use super::{entry_size, KvBackend};
use crate::error::StorageError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory backend with an optional byte quota
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: DashMap<String, Vec<u8>>,
    quota: Option<u64>,
    used: AtomicU64,
}

impl MemoryBackend {
    /// Unbounded map
    pub fn new() -> Self {
        Self::default()
    }

    /// Map that rejects writes once keys + values exceed `quota_bytes`
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            quota: Some(quota_bytes),
            ..Self::default()
        }
    }

    /// Bytes currently charged against the quota
    pub fn used_bytes(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let needed = entry_size(key, value.len());

        // Holding the entry locks its shard, so the quota check and the
        // insert see the same previous value.
        let entry = self.entries.entry(key.to_string());
        let previous = match &entry {
            Entry::Occupied(occupied) => entry_size(key, occupied.get().len()),
            Entry::Vacant(_) => 0,
        };

        if let Some(quota) = self.quota {
            let used = self.used.load(Ordering::Acquire).saturating_sub(previous);
            if used + needed > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    available: quota.saturating_sub(used),
                });
            }
        }

        entry.insert(value.to_vec());
        self.used.fetch_add(needed, Ordering::AcqRel);
        self.used.fetch_sub(previous, Ordering::AcqRel);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.get(key).map(|value| value.clone()))
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        if let Some((key, value)) = self.entries.remove(key) {
            self.used
                .fetch_sub(entry_size(&key, value.len()), Ordering::AcqRel);
        }
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_remove() {
        let backend = MemoryBackend::new();
        backend.put("a", b"hello").await.unwrap();

        assert_eq!(backend.get("a").await.unwrap(), Some(b"hello".to_vec()));
        assert!(backend.contains("a").await.unwrap());

        backend.remove("a").await.unwrap();
        backend.remove("a").await.unwrap();
        assert_eq!(backend.get("a").await.unwrap(), None);
        assert_eq!(backend.used_bytes(), 0);
    }

    #[tokio::test]
    async fn test_quota_rejects_without_clobbering() {
        let backend = MemoryBackend::with_quota(10);
        backend.put("k", b"12345").await.unwrap();
        assert_eq!(backend.used_bytes(), 6);

        let err = backend.put("big", b"1234567890").await.unwrap_err();
        assert!(err.is_quota());
        assert!(!backend.contains("big").await.unwrap());
        assert_eq!(backend.get("k").await.unwrap(), Some(b"12345".to_vec()));
    }

    #[tokio::test]
    async fn test_replacing_credits_previous_size() {
        let backend = MemoryBackend::with_quota(10);
        backend.put("k", b"123456789").await.unwrap();
        // Would not fit next to the old value, fits in its place
        backend.put("k", b"987654321").await.unwrap();
        assert_eq!(backend.used_bytes(), 10);
        assert_eq!(backend.len(), 1);
    }
}

//! Read-through store over a bounded primary and an unbounded fallback
//!
//! Writes land in the primary tier until it refuses them; from then on the
//! key lives in the fallback tier until it is removed. Reads check the
//! primary first, then the fallback.

use super::{FileBackend, KvBackend, MemoryBackend, SledBackend};
use crate::config::Config;
use crate::error::StorageError;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which tier holds a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Primary,
    Fallback,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Primary => write!(f, "primary"),
            Tier::Fallback => write!(f, "fallback"),
        }
    }
}

/// Two-tier key/value store
#[derive(Clone)]
pub struct TieredStore {
    primary: Arc<dyn KvBackend>,
    fallback: Arc<dyn KvBackend>,
}

impl TieredStore {
    pub fn new(primary: Arc<dyn KvBackend>, fallback: Arc<dyn KvBackend>) -> Self {
        Self { primary, fallback }
    }

    /// sled primary + file fallback under `config.storage_dir`
    pub async fn open(config: &Config) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(&config.storage_dir).await?;

        let primary = SledBackend::open(
            config.primary_db_path(),
            config.sled_cache_bytes,
            config.primary_quota(),
        )?;
        let fallback = FileBackend::new(config.fallback_dir()).await?;

        Ok(Self::new(Arc::new(primary), Arc::new(fallback)))
    }

    /// Both tiers in memory, primary capped at `primary_quota` bytes
    pub fn in_memory(primary_quota: u64) -> Self {
        Self::new(
            Arc::new(MemoryBackend::with_quota(primary_quota)),
            Arc::new(MemoryBackend::new()),
        )
    }

    /// Write `value` at `key`.
    ///
    /// Fails with [`StorageError::WriteFailed`] only when neither tier
    /// accepted the value.
    pub async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        if self.fallback_holds(key).await {
            return self.write_fallback(key, value).await;
        }

        match self.primary.put(key, value).await {
            Ok(()) => {
                debug!(key = %key, size = value.len(), tier = %Tier::Primary, "Stored entry");
                Ok(())
            }
            Err(e) => {
                if e.is_quota() {
                    warn!(key = %key, size = value.len(), error = %e, "Primary tier full, promoting to fallback");
                } else {
                    warn!(key = %key, backend = self.primary.name(), error = %e, "Primary tier write failed, trying fallback");
                }

                self.write_fallback(key, value).await?;

                // The key now lives in the fallback; a stale primary copy
                // would shadow it on read.
                if let Err(e) = self.primary.remove(key).await {
                    warn!(key = %key, error = %e, "Failed to drop stale primary entry");
                }
                Ok(())
            }
        }
    }

    async fn write_fallback(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        match self.fallback.put(key, value).await {
            Ok(()) => {
                debug!(key = %key, size = value.len(), tier = %Tier::Fallback, "Stored entry");
                Ok(())
            }
            Err(e) => {
                warn!(key = %key, backend = self.fallback.name(), error = %e, "Fallback tier write failed");
                Err(StorageError::WriteFailed(key.to_string()))
            }
        }
    }

    async fn fallback_holds(&self, key: &str) -> bool {
        match self.fallback.contains(key).await {
            Ok(held) => held,
            Err(e) => {
                warn!(key = %key, error = %e, "Fallback lookup failed");
                false
            }
        }
    }

    /// First hit from primary, then fallback.
    ///
    /// A backend read error is logged and treated as a miss.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        for (tier, backend) in self.tiers() {
            match backend.get(key).await {
                Ok(Some(value)) => return Some(value),
                Ok(None) => {}
                Err(e) => warn!(key = %key, tier = %tier, error = %e, "Tier read failed"),
            }
        }
        None
    }

    /// Remove from both tiers. Never fails.
    pub async fn remove(&self, key: &str) {
        for (tier, backend) in self.tiers() {
            if let Err(e) = backend.remove(key).await {
                warn!(key = %key, tier = %tier, error = %e, "Tier remove failed");
            }
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.locate(key).await.is_some()
    }

    /// Tier currently serving `key`
    pub async fn locate(&self, key: &str) -> Option<Tier> {
        for (tier, backend) in self.tiers() {
            if let Ok(true) = backend.contains(key).await {
                return Some(tier);
            }
        }
        None
    }

    fn tiers(&self) -> [(Tier, &Arc<dyn KvBackend>); 2] {
        [
            (Tier::Primary, &self.primary),
            (Tier::Fallback, &self.fallback),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Backend that refuses every write
    struct Broken;

    #[async_trait]
    impl KvBackend for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn put(&self, _key: &str, _value: &[u8]) -> Result<(), StorageError> {
            Err(StorageError::Io(std::io::Error::other("disk gone")))
        }

        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            Ok(None)
        }

        async fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }

        async fn contains(&self, _key: &str) -> Result<bool, StorageError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_small_write_stays_in_primary() {
        let store = TieredStore::in_memory(1024);
        store.set("k", b"v").await.unwrap();

        assert_eq!(store.locate("k").await, Some(Tier::Primary));
        assert_eq!(store.get("k").await, Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_overflow_promotes_to_fallback() {
        let store = TieredStore::in_memory(16);
        let big = vec![b'x'; 64];
        store.set("big", &big).await.unwrap();

        assert_eq!(store.locate("big").await, Some(Tier::Fallback));
        assert_eq!(store.get("big").await, Some(big));
    }

    #[tokio::test]
    async fn test_promotion_drops_stale_primary_copy() {
        let store = TieredStore::in_memory(16);
        store.set("k", b"small").await.unwrap();
        assert_eq!(store.locate("k").await, Some(Tier::Primary));

        let big = vec![b'y'; 64];
        store.set("k", &big).await.unwrap();
        assert_eq!(store.locate("k").await, Some(Tier::Fallback));
        assert_eq!(store.get("k").await, Some(big));
    }

    #[tokio::test]
    async fn test_promoted_key_stays_in_fallback_until_removed() {
        let store = TieredStore::in_memory(16);
        store.set("k", &[b'z'; 64]).await.unwrap();

        // Fits the primary now, but the key is pinned to the fallback
        store.set("k", b"tiny").await.unwrap();
        assert_eq!(store.locate("k").await, Some(Tier::Fallback));
        assert_eq!(store.get("k").await, Some(b"tiny".to_vec()));

        store.remove("k").await;
        assert!(!store.exists("k").await);

        store.set("k", b"tiny").await.unwrap();
        assert_eq!(store.locate("k").await, Some(Tier::Primary));
    }

    #[tokio::test]
    async fn test_both_tiers_failing_is_write_failed() {
        let store = TieredStore::new(Arc::new(Broken), Arc::new(Broken));
        let err = store.set("k", b"v").await.unwrap_err();
        assert!(matches!(err, StorageError::WriteFailed(key) if key == "k"));
    }

    #[tokio::test]
    async fn test_non_quota_primary_failure_uses_fallback() {
        let store = TieredStore::new(Arc::new(Broken), Arc::new(MemoryBackend::new()));
        store.set("k", b"v").await.unwrap();
        assert_eq!(store.locate("k").await, Some(Tier::Fallback));
    }

    #[tokio::test]
    async fn test_missing_key_is_empty() {
        let store = TieredStore::in_memory(1024);
        assert_eq!(store.get("never").await, None);
        store.remove("never").await;
        assert!(!store.exists("never").await);
    }

    #[tokio::test]
    async fn test_open_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            storage_dir: temp_dir.path().to_path_buf(),
            primary_quota_bytes: 32,
            ..Default::default()
        };
        let store = TieredStore::open(&config).await.unwrap();

        store.set("small", b"abc").await.unwrap();
        store.set("large", &[b'q'; 128]).await.unwrap();

        assert_eq!(store.locate("small").await, Some(Tier::Primary));
        assert_eq!(store.locate("large").await, Some(Tier::Fallback));
        assert_eq!(store.get("large").await.map(|v| v.len()), Some(128));
    }
}

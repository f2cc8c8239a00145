//! Key/value tiers
//!
//! Two pluggable backends sit behind [`TieredStore`]:
//!
//! | Tier     | Default backend | Bound                       |
//! |----------|-----------------|-----------------------------|
//! | Primary  | [`SledBackend`] | `primary_quota_bytes`       |
//! | Fallback | [`FileBackend`] | none                        |
//!
//! [`MemoryBackend`] can stand in for either tier, which is how the tests
//! simulate a full primary.

use crate::error::StorageError;
use async_trait::async_trait;

pub mod file;
pub mod memory;
pub mod sled_backend;
pub mod tiered;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use sled_backend::SledBackend;
pub use tiered::{Tier, TieredStore};

/// A single storage tier.
///
/// A bounded backend must reject a write that would exceed its capacity with
/// [`StorageError::QuotaExceeded`] and leave any previous value untouched.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Short name used in log fields
    fn name(&self) -> &'static str;

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Removing an absent key is not an error
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    async fn contains(&self, key: &str) -> Result<bool, StorageError>;
}

/// Bytes charged against a quota for one entry
pub(crate) fn entry_size(key: &str, value_len: usize) -> u64 {
    (key.len() + value_len) as u64
}

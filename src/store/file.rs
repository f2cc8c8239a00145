//! Unbounded fallback tier on the local filesystem
//!
//! Each key becomes one file named by the SHA256 of the key, spread over
//! subdirectories by the first four hex characters:
//!
//! ```text
//! fallback/
//! ├── 3f2a/
//! │   └── 3f2a9c...   # value bytes
//! └── b71e/
//!     └── b71e04...
//! ```

use super::KvBackend;
use crate::error::StorageError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Directory-backed tier
pub struct FileBackend {
    root_dir: PathBuf,
}

impl FileBackend {
    /// Create the backend, making `root_dir` if needed
    pub async fn new<P: AsRef<Path>>(root_dir: P) -> Result<Self, StorageError> {
        let root_dir = root_dir.as_ref().to_path_buf();
        fs::create_dir_all(&root_dir).await?;

        info!(path = %root_dir.display(), "Initialized fallback tier");

        Ok(Self { root_dir })
    }

    /// Hex SHA256 of a key, used as its file name
    pub fn file_name(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let name = Self::file_name(key);
        self.root_dir.join(&name[..4]).join(name)
    }
}

#[async_trait]
impl KvBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let path = self.entry_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write then rename so a reader never sees a torn value
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, value).await?;
        fs::rename(&tmp_path, &path).await?;

        debug!(key = %key, size = value.len(), "Stored fallback entry");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.entry_path(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(fs::metadata(self.entry_path(key)).await.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileBackend::new(temp_dir.path()).await.unwrap();

        backend.put("t1-transcript.csv", b"a,b\n1,2").await.unwrap();
        assert_eq!(
            backend.get("t1-transcript.csv").await.unwrap(),
            Some(b"a,b\n1,2".to_vec())
        );

        backend.put("t1-transcript.csv", b"replaced").await.unwrap();
        assert_eq!(
            backend.get("t1-transcript.csv").await.unwrap(),
            Some(b"replaced".to_vec())
        );
    }

    #[tokio::test]
    async fn test_missing_key() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileBackend::new(temp_dir.path()).await.unwrap();

        assert_eq!(backend.get("nope").await.unwrap(), None);
        assert!(!backend.contains("nope").await.unwrap());
        backend.remove("nope").await.unwrap();
    }

    #[test]
    fn test_file_name() {
        let name = FileBackend::file_name("key");
        assert_eq!(name.len(), 64);
        assert_ne!(name, FileBackend::file_name("key2"));
    }
}

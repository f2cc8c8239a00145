//! Chunked persistence for oversized line-oriented payloads
//!
//! A payload above the chunk bound is split on newlines into pieces that
//! each start with the payload's boundary line (a CSV header, say), so every
//! chunk parses on its own. Chunks are written in index order and the
//! manifest goes last:
//!
//! ```text
//! <base>-chunk-0      boundary + records
//! <base>-chunk-1      boundary + records
//! <base>-chunk-info   {"totalChunks":2,"totalSize":...,"chunkSize":...}
//! ```
//!
//! A save that dies before the manifest leaves orphan chunks that no reader
//! ever follows. Re-saving a chunked key drops the old manifest before any
//! chunk is overwritten, and removal always takes the manifest first.

use crate::error::StorageError;
use crate::store::TieredStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Chunk bound (4MB)
pub const CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Payloads above this are logged as unusually large (10MB)
pub const LARGE_PAYLOAD_WARN: usize = 10 * 1024 * 1024;

/// Describes how a key was split. Present only for chunked keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkManifest {
    /// Number of chunk entries, always > 0
    pub total_chunks: u32,
    /// Bytes in the unsplit payload
    pub total_size: u64,
    /// Bound used to split
    pub chunk_size: u64,
}

/// Maps a base key to its storage keys
pub trait KeyLayout: Send + Sync {
    /// Key of an unchunked payload
    fn single_key(&self, base: &str) -> String;

    fn chunk_key(&self, base: &str, index: u32) -> String;

    fn manifest_key(&self, base: &str) -> String;
}

/// `<base>`, `<base>-chunk-<i>`, `<base>-chunk-info`
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultKeyLayout;

impl KeyLayout for DefaultKeyLayout {
    fn single_key(&self, base: &str) -> String {
        base.to_string()
    }

    fn chunk_key(&self, base: &str, index: u32) -> String {
        format!("{}-chunk-{}", base, index)
    }

    fn manifest_key(&self, base: &str) -> String {
        format!("{}-chunk-info", base)
    }
}

/// Transcript file names, keyed by transcript id:
/// `<id>-transcript.csv`, `<id>-transcript-chunk-<i>.csv`, `<id>-chunk-info.json`
#[derive(Debug, Clone, Copy, Default)]
pub struct TranscriptKeyLayout;

impl KeyLayout for TranscriptKeyLayout {
    fn single_key(&self, id: &str) -> String {
        format!("{}-transcript.csv", id)
    }

    fn chunk_key(&self, id: &str, index: u32) -> String {
        format!("{}-transcript-chunk-{}.csv", id, index)
    }

    fn manifest_key(&self, id: &str) -> String {
        format!("{}-chunk-info.json", id)
    }
}

/// Bounds used by [`ChunkCoordinator`]
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Largest payload stored as one entry, and the target chunk size
    pub chunk_size: usize,

    /// Advisory only
    pub warn_threshold: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            warn_threshold: LARGE_PAYLOAD_WARN,
        }
    }
}

/// Splits, writes, reassembles and deletes chunked payloads
#[derive(Clone)]
pub struct ChunkCoordinator {
    store: TieredStore,
    config: ChunkConfig,
    layout: Arc<dyn KeyLayout>,
}

impl ChunkCoordinator {
    pub fn new(store: TieredStore, config: ChunkConfig) -> Self {
        Self {
            store,
            config,
            layout: Arc::new(DefaultKeyLayout),
        }
    }

    /// Use a different key naming scheme
    pub fn with_layout(mut self, layout: Arc<dyn KeyLayout>) -> Self {
        self.layout = layout;
        self
    }

    pub fn store(&self) -> &TieredStore {
        &self.store
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Persist `payload` under `base`, chunking when it exceeds the bound.
    ///
    /// When chunked, the payload's first line must be `boundary_line`; it is
    /// repeated at the head of every chunk.
    pub async fn save(
        &self,
        base: &str,
        payload: &[u8],
        boundary_line: &str,
    ) -> Result<(), StorageError> {
        if payload.len() > self.config.warn_threshold {
            warn!(key = %base, size = payload.len(), "Saving unusually large payload");
        }

        let previous = self.manifest(base).await.unwrap_or_else(|e| {
            warn!(key = %base, error = %e, "Ignoring unreadable manifest");
            None
        });

        if payload.len() <= self.config.chunk_size {
            self.store.set(&self.layout.single_key(base), payload).await?;

            // A previous chunked version would otherwise win on load. The
            // manifest goes before its chunks so none is left dangling.
            self.store.remove(&self.layout.manifest_key(base)).await;
            if let Some(old) = previous {
                self.remove_chunks(base, 0, old.total_chunks).await;
            }

            debug!(key = %base, size = payload.len(), "Stored unchunked payload");
            return Ok(());
        }

        let chunks = split_records(payload, boundary_line, self.config.chunk_size)?;
        let total_chunks = chunks.len() as u32;

        // The old manifest must not see chunks being overwritten. Until the
        // new manifest lands, readers fall back to the single entry or miss.
        if previous.is_some() {
            self.store.remove(&self.layout.manifest_key(base)).await;
        }

        for (index, chunk) in chunks.iter().enumerate() {
            self.store
                .set(&self.layout.chunk_key(base, index as u32), chunk)
                .await?;
        }

        let manifest = ChunkManifest {
            total_chunks,
            total_size: payload.len() as u64,
            chunk_size: self.config.chunk_size as u64,
        };
        self.store
            .set(
                &self.layout.manifest_key(base),
                &serde_json::to_vec(&manifest)?,
            )
            .await?;

        // Old representations are dropped only once the new one is readable
        self.store.remove(&self.layout.single_key(base)).await;
        if let Some(old) = previous {
            self.remove_chunks(base, total_chunks, old.total_chunks).await;
        }

        info!(
            key = %base,
            size = payload.len(),
            chunks = total_chunks,
            "Stored chunked payload"
        );
        Ok(())
    }

    /// Reassemble the payload stored under `base`.
    ///
    /// A chunked payload comes back with trailing newlines removed.
    pub async fn load(&self, base: &str) -> Result<Vec<u8>, StorageError> {
        let Some(manifest) = self.manifest(base).await? else {
            return self
                .store
                .get(&self.layout.single_key(base))
                .await
                .ok_or_else(|| StorageError::NotFound(base.to_string()));
        };

        let mut chunks = Vec::with_capacity(manifest.total_chunks as usize);
        for index in 0..manifest.total_chunks {
            match self.store.get(&self.layout.chunk_key(base, index)).await {
                Some(chunk) => chunks.push(chunk),
                None => {
                    warn!(key = %base, index, total = manifest.total_chunks, "Missing chunk");
                    return Err(StorageError::MissingChunk {
                        key: base.to_string(),
                        index,
                    });
                }
            }
        }

        Ok(join_chunks(&chunks, manifest.total_size as usize))
    }

    /// Remove every entry belonging to `base`
    pub async fn delete(&self, base: &str) {
        match self.manifest(base).await {
            Ok(Some(manifest)) => {
                self.store.remove(&self.layout.manifest_key(base)).await;
                self.remove_chunks(base, 0, manifest.total_chunks).await;
                debug!(key = %base, chunks = manifest.total_chunks, "Deleted chunked payload");
            }
            Ok(None) => {
                self.store.remove(&self.layout.single_key(base)).await;
                debug!(key = %base, "Deleted payload");
            }
            Err(e) => {
                // Nothing trustworthy to walk; drop what the key names directly
                warn!(key = %base, error = %e, "Deleting payload with unreadable manifest");
                self.store.remove(&self.layout.manifest_key(base)).await;
                self.store.remove(&self.layout.single_key(base)).await;
            }
        }
    }

    /// Manifest for `base`, if it was chunked
    pub async fn manifest(&self, base: &str) -> Result<Option<ChunkManifest>, StorageError> {
        let key = self.layout.manifest_key(base);
        let Some(raw) = self.store.get(&key).await else {
            return Ok(None);
        };

        let manifest: ChunkManifest = serde_json::from_slice(&raw)
            .map_err(|e| StorageError::UnsupportedSchema(format!("manifest {}: {}", key, e)))?;
        if manifest.total_chunks == 0 {
            return Err(StorageError::UnsupportedSchema(format!(
                "manifest {} lists no chunks",
                key
            )));
        }
        Ok(Some(manifest))
    }

    pub async fn is_chunked(&self, base: &str) -> bool {
        self.store.exists(&self.layout.manifest_key(base)).await
    }

    async fn remove_chunks(&self, base: &str, from: u32, to: u32) {
        for index in from..to {
            self.store.remove(&self.layout.chunk_key(base, index)).await;
        }
    }
}

/// Split `payload` into chunks of at most `chunk_size` bytes, each starting
/// with `boundary_line`.
///
/// A single record longer than the bound gets a chunk of its own. Trailing
/// newlines are dropped.
pub fn split_records(
    payload: &[u8],
    boundary_line: &str,
    chunk_size: usize,
) -> Result<Vec<Vec<u8>>, StorageError> {
    let boundary = boundary_line.as_bytes();
    let mut records = trim_trailing_newlines(payload).split(|&b| b == b'\n');

    // The payload's own first line is repeated, so CRLF input keeps its `\r`
    let header = match records.next() {
        Some(first) if first == boundary || first.strip_suffix(b"\r") == Some(boundary) => first,
        _ => {
            return Err(StorageError::InvalidPayload(format!(
                "payload does not start with boundary line {:?}",
                boundary_line
            )))
        }
    };

    let mut chunks = Vec::new();
    let mut current = header.to_vec();

    for record in records {
        let holds_records = current.len() > header.len();
        if holds_records && current.len() + 1 + record.len() > chunk_size {
            chunks.push(std::mem::replace(&mut current, header.to_vec()));
        }
        current.push(b'\n');
        current.extend_from_slice(record);
    }

    if current.len() > header.len() || chunks.is_empty() {
        chunks.push(current);
    }

    Ok(chunks)
}

/// Inverse of [`split_records`]: keep the first chunk whole and drop the
/// boundary line from the rest.
pub fn join_chunks(chunks: &[Vec<u8>], size_hint: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(size_hint);

    for (index, chunk) in chunks.iter().enumerate() {
        if index == 0 {
            data.extend_from_slice(chunk);
            continue;
        }
        if let Some(pos) = chunk.iter().position(|&b| b == b'\n') {
            data.push(b'\n');
            data.extend_from_slice(&chunk[pos + 1..]);
        }
    }

    data
}

fn trim_trailing_newlines(payload: &[u8]) -> &[u8] {
    let end = payload
        .iter()
        .rposition(|&b| b != b'\n')
        .map_or(0, |pos| pos + 1);
    &payload[..end]
}

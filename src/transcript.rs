//! Transcript repository
//!
//! Everything stored for one transcript, keyed by its id:
//!
//! | Key                                      | Contents                          |
//! |------------------------------------------|-----------------------------------|
//! | `<id>-transcript.csv`                    | CSV, when under the chunk bound   |
//! | `<id>-transcript-chunk-<i>.csv`          | CSV chunk, header repeated        |
//! | `<id>-chunk-info.json`                   | Transcript chunk manifest         |
//! | `<id>-speakers.json` ...                 | Auxiliary [`Artifact`]s           |
//! | `<id>-annotations-<rater>-<category>`    | One matrix, line-oriented         |
//! | `<id>-annotations-<rater>.json`          | Category list, written last       |
//!
//! A rater's annotation set is only visible once its category list is in
//! place, the same way a chunked payload is only visible once its manifest
//! is.

use crate::chunking::{ChunkConfig, ChunkCoordinator, ChunkManifest, TranscriptKeyLayout};
use crate::codec::{decode_record, encode_lines};
use crate::error::StorageError;
use crate::model::AnnotationSet;
use crate::store::TieredStore;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Auxiliary files stored next to a transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    Speakers,
    Content,
    Images,
    /// The uploaded source file, before conversion
    Original,
}

impl Artifact {
    pub const ALL: [Artifact; 4] = [
        Artifact::Speakers,
        Artifact::Content,
        Artifact::Images,
        Artifact::Original,
    ];

    pub fn key(self, id: &str) -> String {
        match self {
            Artifact::Speakers => format!("{}-speakers.json", id),
            Artifact::Content => format!("{}-content.json", id),
            Artifact::Images => format!("{}-images.json", id),
            Artifact::Original => format!("{}-original", id),
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Artifact::Speakers => write!(f, "speakers"),
            Artifact::Content => write!(f, "content"),
            Artifact::Images => write!(f, "images"),
            Artifact::Original => write!(f, "original"),
        }
    }
}

fn annotation_index_key(id: &str, rater: &str) -> String {
    format!("{}-annotations-{}.json", id, rater)
}

fn annotation_base(id: &str, rater: &str, category: &str) -> String {
    format!("{}-annotations-{}-{}", id, rater, category)
}

/// First line of `csv` without its line ending
fn header_line(csv: &[u8]) -> Result<&str, StorageError> {
    let first = csv.split(|&b| b == b'\n').next().unwrap_or_default();
    let first = first.strip_suffix(b"\r").unwrap_or(first);
    std::str::from_utf8(first)
        .map_err(|e| StorageError::InvalidPayload(format!("CSV header is not UTF-8: {}", e)))
}

/// Transcripts, their artifacts and per-rater annotation sets
#[derive(Clone)]
pub struct TranscriptRepository {
    store: TieredStore,
    transcripts: ChunkCoordinator,
    matrices: ChunkCoordinator,
}

impl TranscriptRepository {
    pub fn new(store: TieredStore, chunk_config: ChunkConfig) -> Self {
        let transcripts = ChunkCoordinator::new(store.clone(), chunk_config.clone())
            .with_layout(Arc::new(TranscriptKeyLayout));
        let matrices = ChunkCoordinator::new(store.clone(), chunk_config);

        Self {
            store,
            transcripts,
            matrices,
        }
    }

    pub fn store(&self) -> &TieredStore {
        &self.store
    }

    // ========================================================================
    // Transcripts
    // ========================================================================

    /// Store a transcript CSV; the header line is repeated in every chunk
    pub async fn save_transcript(&self, id: &str, csv: &[u8]) -> Result<(), StorageError> {
        let header = header_line(csv)?;
        self.transcripts.save(id, csv, header).await?;
        info!(transcript = %id, size = csv.len(), "Saved transcript");
        Ok(())
    }

    pub async fn load_transcript(&self, id: &str) -> Result<Vec<u8>, StorageError> {
        self.transcripts.load(id).await
    }

    pub async fn is_chunked(&self, id: &str) -> bool {
        self.transcripts.is_chunked(id).await
    }

    pub async fn chunk_info(&self, id: &str) -> Result<Option<ChunkManifest>, StorageError> {
        self.transcripts.manifest(id).await
    }

    /// Remove the transcript, its artifacts and the named raters' annotations
    pub async fn delete_transcript(&self, id: &str, raters: &[String]) -> Result<(), StorageError> {
        self.transcripts.delete(id).await;

        for artifact in Artifact::ALL {
            self.store.remove(&artifact.key(id)).await;
        }

        for rater in raters {
            self.clear_annotations(id, rater).await?;
        }

        info!(transcript = %id, raters = raters.len(), "Deleted transcript");
        Ok(())
    }

    // ========================================================================
    // Artifacts
    // ========================================================================

    pub async fn save_artifact(
        &self,
        id: &str,
        artifact: Artifact,
        data: &[u8],
    ) -> Result<(), StorageError> {
        self.store.set(&artifact.key(id), data).await?;
        debug!(transcript = %id, artifact = %artifact, size = data.len(), "Saved artifact");
        Ok(())
    }

    pub async fn load_artifact(&self, id: &str, artifact: Artifact) -> Option<Vec<u8>> {
        self.store.get(&artifact.key(id)).await
    }

    // ========================================================================
    // Annotations
    // ========================================================================

    /// Persist a rater's annotation set, replacing any previous one.
    ///
    /// Categories are written first and the category list last. Categories
    /// dropped since the previous save are removed afterwards.
    pub async fn save_annotations(
        &self,
        id: &str,
        rater: &str,
        set: &AnnotationSet,
    ) -> Result<(), StorageError> {
        let previous = self.categories(id, rater).await?.unwrap_or_default();

        for (category, matrix) in set {
            let (header, payload) = encode_lines(matrix)?;
            self.matrices
                .save(&annotation_base(id, rater, category), &payload, &header)
                .await?;
        }

        let categories: Vec<&String> = set.keys().collect();
        self.store
            .set(
                &annotation_index_key(id, rater),
                &serde_json::to_vec(&categories)?,
            )
            .await?;

        for stale in previous.iter().filter(|c| !set.contains_key(*c)) {
            self.matrices.delete(&annotation_base(id, rater, stale)).await;
        }

        info!(
            transcript = %id,
            rater = %rater,
            categories = categories.len(),
            "Saved annotations"
        );
        Ok(())
    }

    /// Load a rater's annotation set, `None` when the rater has none.
    ///
    /// `fallback_num_lines` is used for matrices stored without a line count.
    pub async fn load_annotations(
        &self,
        id: &str,
        rater: &str,
        fallback_num_lines: Option<usize>,
    ) -> Result<Option<AnnotationSet>, StorageError> {
        let Some(categories) = self.categories(id, rater).await? else {
            return Ok(None);
        };

        let mut set = AnnotationSet::new();
        for category in categories {
            let payload = self
                .matrices
                .load(&annotation_base(id, rater, &category))
                .await?;
            let matrix = decode_record(&payload, fallback_num_lines)?;
            set.insert(category, matrix);
        }

        Ok(Some(set))
    }

    /// Remove a rater's annotation set. The category list goes first so a
    /// partial clear is never read as a set.
    pub async fn clear_annotations(&self, id: &str, rater: &str) -> Result<(), StorageError> {
        let categories = match self.categories(id, rater).await {
            Ok(categories) => categories.unwrap_or_default(),
            Err(e) => {
                warn!(transcript = %id, rater = %rater, error = %e, "Clearing unreadable annotation index");
                Vec::new()
            }
        };

        self.store.remove(&annotation_index_key(id, rater)).await;
        for category in &categories {
            self.matrices
                .delete(&annotation_base(id, rater, category))
                .await;
        }

        debug!(transcript = %id, rater = %rater, categories = categories.len(), "Cleared annotations");
        Ok(())
    }

    async fn categories(&self, id: &str, rater: &str) -> Result<Option<Vec<String>>, StorageError> {
        let key = annotation_index_key(id, rater);
        let Some(raw) = self.store.get(&key).await else {
            return Ok(None);
        };

        let categories = serde_json::from_slice(&raw)
            .map_err(|e| StorageError::UnsupportedSchema(format!("annotation index {}: {}", key, e)))?;
        Ok(Some(categories))
    }
}

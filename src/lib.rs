//! Annotation Store - storage and agreement statistics for coded transcripts
//!
//! Holds classroom transcripts and the per-line code annotations raters make
//! on them, and scores how closely two raters (a human and a model, usually)
//! agree.
//!
//! ## Architecture
//!
//! - **TieredStore**: key/value store over a bounded primary tier and an
//!   unbounded fallback tier
//! - **ChunkCoordinator**: splits large line-oriented payloads into
//!   independently parseable chunks under a manifest
//! - **Codec**: sparse encoding of annotation matrices
//! - **Stats / Reliability**: agreement rates, precision/recall/F1, kappa
//!   and alpha
//!
//! ## Why Two Tiers?
//!
//! | Primary tier | Fallback tier |
//! |--------------|---------------|
//! | sled, quota-bounded | one file per key |
//! | Fast point reads | Unbounded |
//! | Refuses writes when full | Takes what the primary refuses |
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/annotation-store/
//! ├── primary.sled/          # Primary tier
//! ├── fallback/              # Fallback tier
//! │   ├── 3fa2/3fa2c1...     # sha256(key), first 4 chars as subdir
//! │   └── 9b0e/9b0e77...
//! └── config.toml            # Configuration
//! ```

pub mod chunking;
pub mod codec;
pub mod config;
pub mod error;
pub mod model;
pub mod reliability;
pub mod stats;
pub mod store;
pub mod transcript;

// Re-exports
pub use chunking::{
    ChunkConfig, ChunkCoordinator, ChunkManifest, DefaultKeyLayout, KeyLayout, TranscriptKeyLayout,
};
pub use codec::{SparseMatrix, StoredMatrix};
pub use config::Config;
pub use error::StorageError;
pub use model::{AnnotationMatrix, AnnotationSet, FeatureDetails};
pub use stats::{AgreementEngine, FeatureComparison, FeatureKind, Rate, Stats, StatsConfig};
pub use store::{KvBackend, Tier, TieredStore};
pub use transcript::{Artifact, TranscriptRepository};

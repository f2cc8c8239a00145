//! Annotation Store CLI
//!
//! Stores transcripts in the tiered store and compares annotation sets.
//!
//! ## Usage
//!
//! ```bash
//! # Import a transcript CSV (chunked when over 4MB)
//! annotation-store import lesson-7 lesson-7.csv
//!
//! # Write it back to stdout
//! annotation-store export lesson-7 > lesson-7.csv
//!
//! # Chunking, tier and artifact details
//! annotation-store info lesson-7
//!
//! # Remove the transcript, its artifacts and two raters' annotations
//! annotation-store delete lesson-7 --rater alice --rater model
//!
//! # Agreement between two annotation workbooks over lines 1..=120
//! annotation-store compare human.json machine.json --lines 120
//!
//! # Use a different storage directory
//! annotation-store --storage-dir /data/annotations info lesson-7
//! ```

use annotation_store::codec::decode_set;
use annotation_store::{
    AgreementEngine, AnnotationSet, Artifact, ChunkConfig, Config, KeyLayout, StatsConfig,
    TieredStore, TranscriptKeyLayout, TranscriptRepository,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "annotation-store")]
#[command(about = "Tiered transcript storage and annotation agreement")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "ANNOTATION_STORE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Primary tier capacity in bytes (0 = unbounded)
    #[arg(long)]
    primary_quota: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a transcript CSV under an id
    Import { id: String, csv: PathBuf },

    /// Print a stored transcript to stdout
    Export { id: String },

    /// Show how a transcript is stored
    Info { id: String },

    /// Delete a transcript and everything stored with it
    Delete {
        id: String,

        /// Rater whose annotations are removed too (repeatable)
        #[arg(long = "rater")]
        raters: Vec<String>,
    },

    /// Compare two annotation workbooks and print the report as JSON
    Compare {
        human: PathBuf,
        machine: PathBuf,

        /// Number of transcript lines compared (1..=N)
        #[arg(long)]
        lines: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries command output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("annotation_store=info".parse()?),
        )
        .init();

    let Args {
        config,
        storage_dir,
        primary_quota,
        command,
    } = Args::parse();

    // Comparison works on files; every other command opens the store
    let open = || open_repository(config.clone(), storage_dir.clone(), primary_quota);

    match command {
        Command::Compare {
            human,
            machine,
            lines,
        } => compare(&human, &machine, lines).await?,
        Command::Import { id, csv } => {
            let repo = open().await?;
            let data = tokio::fs::read(&csv)
                .await
                .with_context(|| format!("reading {}", csv.display()))?;
            repo.save_transcript(&id, &data).await?;
            println!(
                "Imported {} ({} bytes, {})",
                id,
                data.len(),
                if repo.is_chunked(&id).await { "chunked" } else { "single entry" }
            );
        }
        Command::Export { id } => {
            let repo = open().await?;
            let data = repo.load_transcript(&id).await?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&data)?;
            stdout.flush()?;
        }
        Command::Info { id } => {
            let repo = open().await?;
            let manifest = repo.chunk_info(&id).await?;
            let layout = TranscriptKeyLayout;
            let tier = match &manifest {
                Some(_) => repo.store().locate(&layout.manifest_key(&id)).await,
                None => repo.store().locate(&layout.single_key(&id)).await,
            };

            let mut artifacts = Vec::new();
            for artifact in Artifact::ALL {
                if repo.store().exists(&artifact.key(&id)).await {
                    artifacts.push(artifact.to_string());
                }
            }

            let report = serde_json::json!({
                "id": id,
                "stored": tier.is_some(),
                "tier": tier.map(|t| t.to_string()),
                "chunkInfo": manifest,
                "artifacts": artifacts,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Delete { id, raters } => {
            let repo = open().await?;
            repo.delete_transcript(&id, &raters).await?;
            println!("Deleted {}", id);
        }
    }

    Ok(())
}

/// Load config, apply CLI overrides and open both tiers
async fn open_repository(
    config_path: Option<PathBuf>,
    storage_dir: Option<PathBuf>,
    primary_quota: Option<u64>,
) -> anyhow::Result<TranscriptRepository> {
    // Load config
    let mut config = if let Some(config_path) = &config_path {
        Config::load(config_path)
            .with_context(|| format!("loading config {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = storage_dir {
        config.storage_dir = dir;
    }
    if let Some(quota) = primary_quota {
        config.primary_quota_bytes = quota;
    }

    info!(
        storage_dir = %config.storage_dir.display(),
        primary_quota = config.primary_quota_bytes,
        "Opening annotation store"
    );

    let store = TieredStore::open(&config)
        .await
        .context("opening storage tiers")?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    Ok(TranscriptRepository::new(store, ChunkConfig::default()))
}

async fn read_set(path: &Path, lines: usize) -> anyhow::Result<AnnotationSet> {
    let json = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    decode_set(&json, Some(lines)).with_context(|| format!("parsing {}", path.display()))
}

/// Score `machine` against `human` over lines `1..=lines`
async fn compare(human: &Path, machine: &Path, lines: usize) -> anyhow::Result<()> {
    let human_set = read_set(human, lines).await?;
    let machine_set = read_set(machine, lines).await?;
    let line_numbers: Vec<usize> = (1..=lines).collect();

    let engine = AgreementEngine::new(StatsConfig::default());
    let report = engine.compare_sets(&human_set, &machine_set, &line_numbers);

    info!(
        human = %human.display(),
        machine = %machine.display(),
        features = report.len(),
        "Compared annotation sets"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

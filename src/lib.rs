pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod provider;
pub mod search;
pub mod store;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use config::Config;
use model::{Category, MediaType, NewAsset, ScoredAsset, SearchFilters};
use provider::hash::HashEmbedder;
use provider::remote::RemoteProvider;
use provider::{EmbeddingProvider, VisionProvider};
use search::HybridSearch;
use store::Store;

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "dams",
    version,
    about = "Ingestion, classification, and hybrid search for a media asset library"
)]
pub struct Cli {
    /// Path to the SQLite database
    #[arg(long, env = "DAMS_DB", default_value = "dams.db")]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register assets from a JSON manifest (array of asset records)
    Register {
        /// Manifest file path
        #[arg(long)]
        file: PathBuf,
    },
    /// Run the ingestion pipeline over pending assets
    Ingest {
        /// Worker threads
        #[arg(long)]
        workers: Option<usize>,

        /// Maximum number of assets to process
        #[arg(long, default_value_t = 1000)]
        limit: usize,
    },
    /// Search the library
    Search {
        /// Query text; empty browses by filter
        #[arg(default_value = "")]
        query: String,

        /// Restrict to one album
        #[arg(long)]
        album: Option<String>,

        /// Restrict to a category (template | inspiration)
        #[arg(long)]
        category: Option<String>,

        /// Restrict to a media type (image | video | document | other)
        #[arg(long)]
        media_type: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Emit results as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show pipeline and library statistics
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Queue assets for re-ingestion
    Reingest {
        /// Reset one asset by source id
        #[arg(long, conflicts_with = "failed")]
        source_id: Option<String>,

        /// Reset every failed asset
        #[arg(long)]
        failed: bool,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::from_env();
    let store = Store::open(&cli.db)
        .with_context(|| format!("opening database {}", cli.db.display()))?;

    match cli.command {
        Commands::Register { file } => run_register(&store, &file),
        Commands::Ingest { workers, limit } => run_ingest(&store, &cfg, workers, limit),
        Commands::Search {
            query,
            album,
            category,
            media_type,
            limit,
            json,
        } => {
            let filters = parse_filters(album, category, media_type)?;
            run_search(&store, &cfg, &query, &filters, limit, json)
        }
        Commands::Status { json } => run_status(&store, json),
        Commands::Reingest { source_id, failed } => run_reingest(&store, source_id, failed),
    }
}

fn run_register(store: &Store, file: &PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("reading manifest {}", file.display()))?;
    let manifest: Vec<NewAsset> =
        serde_json::from_str(&raw).context("manifest must be a JSON array of asset records")?;

    let mut registered = 0usize;
    for new in &manifest {
        if new.source_id.is_empty() || new.filename.is_empty() {
            bail!("manifest record missing source_id or filename");
        }
        store.register(new)?;
        registered += 1;
    }
    info!(registered, "manifest registered");
    println!("registered {registered} assets");
    Ok(())
}

fn run_ingest(store: &Store, cfg: &Config, workers: Option<usize>, limit: usize) -> Result<()> {
    let workers = workers.unwrap_or(cfg.workers);
    let remote = RemoteProvider::from_env().ok();

    // Without an API key the pipeline still runs end to end on the
    // deterministic hash embedder; vision is simply unavailable and the
    // classifier falls back to its safe default.
    let hash = HashEmbedder::default();
    let embedder: &dyn EmbeddingProvider = match &remote {
        Some(r) => r,
        None => &hash,
    };
    let vision: Option<&dyn VisionProvider> = remote.as_ref().map(|r| r as &dyn VisionProvider);
    if remote.is_none() {
        info!("no api key configured, using hash embedder without vision");
    }

    let ids = store.pending_assets(limit)?;
    let report = pipeline::Pipeline::new(store, embedder, vision, cfg).run(&ids, workers);
    println!(
        "advanced {} assets: {} indexed, {} failed, {} stalled",
        report.advanced, report.indexed, report.failed, report.stalled
    );
    Ok(())
}

fn run_search(
    store: &Store,
    cfg: &Config,
    query: &str,
    filters: &SearchFilters,
    limit: usize,
    json: bool,
) -> Result<()> {
    let timeout = std::time::Duration::from_millis(cfg.query_embed_timeout_ms);
    let remote = RemoteProvider::from_env_with_timeout(timeout).ok();
    let hash = HashEmbedder::default();
    let embedder: &dyn EmbeddingProvider = match &remote {
        Some(r) => r,
        None => &hash,
    };

    let engine = HybridSearch::new(store, Some(embedder), cfg);
    let results = engine.search(query, filters, limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_results(&results);
    }
    Ok(())
}

fn run_status(store: &Store, json: bool) -> Result<()> {
    let stats = store.stats()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    println!("{} assets total", stats.total);
    for (state, count) in &stats.by_state {
        println!("  {state:>10}  {count}");
    }
    for (category, count) in &stats.by_category {
        println!("  {category:>12}  {count}");
    }
    println!("{} flagged for review", stats.needs_review);
    for f in &stats.failed {
        println!(
            "  failed: {} ({}) {}",
            f.source_id,
            f.filename,
            f.failure.as_deref().unwrap_or("no reason recorded")
        );
    }
    Ok(())
}

fn run_reingest(store: &Store, source_id: Option<String>, failed: bool) -> Result<()> {
    match (source_id, failed) {
        (Some(id), _) => {
            if store.mark_stale(&id)? {
                println!("queued {id} for re-ingestion");
            } else {
                bail!("no asset with source id {id}");
            }
        }
        (None, true) => {
            let n = store.reset_failed()?;
            println!("reset {n} failed assets");
        }
        (None, false) => bail!("pass --source-id ID or --failed"),
    }
    Ok(())
}

fn parse_filters(
    album: Option<String>,
    category: Option<String>,
    media_type: Option<String>,
) -> Result<SearchFilters> {
    let category = match category {
        Some(s) => Some(
            Category::parse(&s).with_context(|| format!("unknown category {s:?}"))?,
        ),
        None => None,
    };
    let media_type = match media_type {
        Some(s) => Some(
            MediaType::parse(&s).with_context(|| format!("unknown media type {s:?}"))?,
        ),
        None => None,
    };
    Ok(SearchFilters {
        album,
        category,
        media_type,
    })
}

fn print_results(results: &[ScoredAsset]) {
    if results.is_empty() {
        println!("no results");
        return;
    }
    for (i, r) in results.iter().enumerate() {
        println!(
            "{:>3}. [{:.3}] {} ({}, {}{})",
            i + 1,
            r.score,
            r.filename,
            r.category.as_str(),
            r.media_type.as_str(),
            r.album_name
                .as_deref()
                .map(|a| format!(", {a}"))
                .unwrap_or_default()
        );
    }
}

//! # picrater CLI
//!
//! The `picrater` binary drives the gallery from the command line and starts
//! the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! picrater --config ./config/picrater.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `picrater init` | Create the database and run schema migrations |
//! | `picrater reindex` | Register new files (`--purge-missing` drops vanished ones) |
//! | `picrater sync-tags` | Copy embedded subjects into the tag index |
//! | `picrater rebuild-index` | Refresh (or `--full` recreate) the search index |
//! | `picrater search "<query>"` | Search by path, filename, and tags |
//! | `picrater pick` | Biased random pick |
//! | `picrater rate <id> <score>` | Record a rating |
//! | `picrater stats` | Leaderboard, or one image with `--id` |
//! | `picrater categories` | List top-level categories |
//! | `picrater health` | Disk and registry counts |
//! | `picrater serve` | Start the HTTP server |
//!
//! Command output goes to stdout; logs go to stderr and follow `RUST_LOG`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use pic_rater::{config, fts, migrate, rate, reindex, search, select, server, stats, tags};

/// Gallery rating backend: biased random picks, tag search, and ratings
/// written back into image metadata.
#[derive(Parser)]
#[command(
    name = "picrater",
    about = "Gallery rating backend: biased random picks, tag search, and metadata write-back",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/picrater.toml`. Environment variables such as
    /// `GALLERY_DIR` and `PICK_BIAS` override the file.
    #[arg(long, global = true, default_value = "./config/picrater.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Probes for trigram full-text support and applies pending migrations.
    /// Running it again is safe.
    Init,

    /// Register gallery files in the database.
    ///
    /// Existing rows and their ratings are never touched.
    Reindex {
        /// Delete rows whose file no longer exists on disk.
        #[arg(long)]
        purge_missing: bool,
    },

    /// Read embedded subjects from each image into the tag index.
    SyncTags {
        /// Only the N most recently registered images (0 = all).
        #[arg(long, default_value = "0")]
        limit: i64,
    },

    /// Rebuild the full-text search index.
    RebuildIndex {
        /// Drop and recreate the index instead of refreshing it.
        #[arg(long)]
        full: bool,
    },

    /// Search images by path, filename, and tags.
    ///
    /// Every whitespace-separated token must match. Quote a phrase to keep
    /// it together.
    Search {
        /// The search query.
        query: String,

        /// Maximum results.
        #[arg(long, default_value = "10")]
        limit: i64,
    },

    /// Pick a random image, biased toward the least rated.
    Pick {
        /// Category expression, e.g. `landscape:3,portrait:1`.
        #[arg(long)]
        cat: Option<String>,

        /// Pick among search matches instead of categories.
        #[arg(long)]
        query: Option<String>,

        /// Bias mode: `off`, `min`, or `weighted`.
        #[arg(long)]
        bias: Option<String>,

        /// Sharpness of the weighted bias.
        #[arg(long)]
        alpha: Option<f64>,
    },

    /// Rate an image by id or relpath.
    Rate {
        /// Image id or relpath.
        identifier: String,

        /// Score between 0 and 5.
        score: f64,

        /// Free-form note stored with the rating.
        #[arg(long)]
        note: Option<String>,
    },

    /// Show the leaderboard, or one image with its rating history.
    Stats {
        /// Image id or relpath.
        #[arg(long)]
        id: Option<String>,

        /// Leaderboard size.
        #[arg(long)]
        top: Option<i64>,
    },

    /// List top-level categories.
    Categories,

    /// Print disk and registry counts as JSON.
    Health,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pic_rater=info,tower_http=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_init(&cfg).await?;
        }
        Commands::Reindex { purge_missing } => {
            reindex::run_reindex(&cfg, purge_missing).await?;
        }
        Commands::SyncTags { limit } => {
            tags::run_sync_tags(&cfg, limit).await?;
        }
        Commands::RebuildIndex { full } => {
            fts::run_rebuild(&cfg, full).await?;
        }
        Commands::Search { query, limit } => {
            search::run_search(&cfg, &query, limit).await?;
        }
        Commands::Pick {
            cat,
            query,
            bias,
            alpha,
        } => {
            let request = select::PickRequest {
                category: cat,
                query,
                bias,
                alpha,
            };
            select::run_pick(&cfg, &request).await?;
        }
        Commands::Rate {
            identifier,
            score,
            note,
        } => {
            rate::run_rate(&cfg, &identifier, score, note.as_deref()).await?;
        }
        Commands::Stats { id, top } => {
            stats::run_stats(&cfg, id.as_deref(), top).await?;
        }
        Commands::Categories => {
            stats::run_categories(&cfg)?;
        }
        Commands::Health => {
            stats::run_health(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

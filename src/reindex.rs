//! Reconciles the gallery directory into the registry.
//!
//! Registration is additive: new files get a row, existing rows (and their
//! ratings) are left alone. With `purge_missing`, rows whose file is gone
//! from disk are deleted. Every chunk commits on its own so an interrupted
//! run can simply be repeated.

use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::fts;
use crate::gallery::{filename_of, image_id_for, top_category, Gallery};

/// Rows per statement batch, below SQLite's bound-parameter ceiling.
pub const BATCH_SIZE: usize = 800;

#[derive(Debug, Clone, Serialize)]
pub struct ReindexReport {
    /// Files found on disk.
    pub indexed: usize,
    /// Rows newly registered by this run.
    pub added: u64,
    /// Rows deleted because their file is gone.
    pub purged: usize,
}

pub async fn reindex(
    pool: &SqlitePool,
    config: &Config,
    purge_missing: bool,
) -> Result<ReindexReport> {
    let gallery = Gallery::new(&config.gallery)?;
    let relpaths = gallery.all_files()?;
    let now = chrono::Utc::now().timestamp();

    let mut added = 0u64;
    for (n, chunk) in relpaths.chunks(BATCH_SIZE).enumerate() {
        let mut tx = pool.begin().await?;
        let mut fresh = Vec::new();
        for relpath in chunk {
            let done = sqlx::query(
                r#"
                INSERT INTO images (id, relpath, category, filename, added_ts)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(relpath) DO NOTHING
                "#,
            )
            .bind(image_id_for(relpath))
            .bind(relpath)
            .bind(top_category(relpath))
            .bind(filename_of(relpath))
            .bind(now)
            .execute(&mut *tx)
            .await?;
            if done.rows_affected() > 0 {
                fresh.push(relpath.clone());
            }
        }
        fts::refresh_rows(&mut *tx, &fresh).await?;
        added += fresh.len() as u64;
        tx.commit().await?;
        debug!(chunk = n, rows = chunk.len(), "registered chunk");
    }

    let purged = if purge_missing {
        purge(pool, &relpaths).await?
    } else {
        0
    };

    info!(indexed = relpaths.len(), added, purged, "reindex finished");

    Ok(ReindexReport {
        indexed: relpaths.len(),
        added,
        purged,
    })
}

/// Deletes registry rows (and their tags and index rows) for relpaths not
/// present in `on_disk`. Rating events are kept.
async fn purge(pool: &SqlitePool, on_disk: &[String]) -> Result<usize> {
    let disk: HashSet<&str> = on_disk.iter().map(String::as_str).collect();

    let registered: Vec<String> = sqlx::query_scalar("SELECT relpath FROM images")
        .fetch_all(pool)
        .await?;
    let missing: Vec<String> = registered
        .into_iter()
        .filter(|r| !disk.contains(r.as_str()))
        .collect();

    for (n, chunk) in missing.chunks(BATCH_SIZE).enumerate() {
        let placeholders = vec!["?"; chunk.len()].join(",");
        let mut tx = pool.begin().await?;

        let delete_tags = format!("DELETE FROM image_tags WHERE relpath IN ({})", placeholders);
        let mut query = sqlx::query(&delete_tags);
        for relpath in chunk {
            query = query.bind(relpath);
        }
        query.execute(&mut *tx).await?;

        let delete_images = format!("DELETE FROM images WHERE relpath IN ({})", placeholders);
        let mut query = sqlx::query(&delete_images);
        for relpath in chunk {
            query = query.bind(relpath);
        }
        query.execute(&mut *tx).await?;

        fts::delete_orphans(&mut *tx).await?;
        tx.commit().await?;
        debug!(chunk = n, rows = chunk.len(), "purged chunk");
    }

    Ok(missing.len())
}

pub async fn run_reindex(config: &Config, purge_missing: bool) -> anyhow::Result<()> {
    let pool = crate::migrate::open(config).await?;
    let report = reindex(&pool, config, purge_missing).await?;

    println!("reindex");
    println!("  indexed: {}", report.indexed);
    println!("  added: {}", report.added);
    println!("  purged: {}", report.purged);
    println!("ok");

    pool.close().await;
    Ok(())
}

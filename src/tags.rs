//! Tag sync: copies embedded subjects into the tag index.
//!
//! Each image's tag set is replaced wholesale (delete, then insert), so a
//! repeated run over unchanged files produces the same rows. Reserved
//! rating markers are stripped before they reach the table.

use serde::Serialize;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::fts;
use crate::gallery::Gallery;
use crate::metadata::{clean_tags, MetadataStore};
use crate::models::TagAssociation;

/// Images per transaction.
pub const COMMIT_EVERY: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub processed: usize,
}

/// Syncs tags for up to `limit` images (0 = all). A bounded run takes the
/// most recently registered images first.
pub async fn sync_tags(
    pool: &SqlitePool,
    config: &Config,
    metadata: &dyn MetadataStore,
    limit: i64,
) -> Result<SyncReport> {
    let gallery = Gallery::new(&config.gallery)?;

    let relpaths: Vec<String> = if limit > 0 {
        sqlx::query_scalar("SELECT relpath FROM images ORDER BY seq DESC LIMIT ?")
            .bind(limit)
            .fetch_all(pool)
            .await?
    } else {
        sqlx::query_scalar("SELECT relpath FROM images ORDER BY seq")
            .fetch_all(pool)
            .await?
    };

    for (n, chunk) in relpaths.chunks(COMMIT_EVERY).enumerate() {
        // Read outside the transaction so slow metadata tools never hold
        // the write lock.
        let mut tagged = Vec::with_capacity(chunk.len());
        for relpath in chunk {
            let raw = metadata.read_tags(&gallery.abs_path(relpath)).await;
            tagged.push((relpath.clone(), clean_tags(&raw)));
        }

        let mut tx = pool.begin().await?;
        for (relpath, tags) in &tagged {
            replace_tags(&mut *tx, relpath, tags).await?;
        }
        fts::refresh_rows(&mut *tx, chunk).await?;
        tx.commit().await?;
        debug!(chunk = n, images = chunk.len(), "tag sync committed");
    }

    info!(processed = relpaths.len(), "tag sync finished");
    Ok(SyncReport {
        processed: relpaths.len(),
    })
}

async fn replace_tags(conn: &mut SqliteConnection, relpath: &str, tags: &[String]) -> Result<()> {
    sqlx::query("DELETE FROM image_tags WHERE relpath = ?")
        .bind(relpath)
        .execute(&mut *conn)
        .await?;
    for tag in tags {
        sqlx::query(
            "INSERT OR IGNORE INTO image_tags (relpath, tag, normalized_tag) VALUES (?, ?, ?)",
        )
        .bind(relpath)
        .bind(tag)
        .bind(tag.to_lowercase())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Tag associations of one image, in tag order.
pub async fn tags_for(pool: &SqlitePool, relpath: &str) -> Result<Vec<TagAssociation>> {
    let rows = sqlx::query(
        "SELECT relpath, tag, normalized_tag FROM image_tags WHERE relpath = ? ORDER BY tag",
    )
    .bind(relpath)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| TagAssociation {
            relpath: row.get("relpath"),
            tag: row.get("tag"),
            normalized_tag: row.get("normalized_tag"),
        })
        .collect())
}

pub async fn run_sync_tags(config: &Config, limit: i64) -> anyhow::Result<()> {
    let pool = crate::migrate::open(config).await?;
    let metadata = crate::metadata::from_config(&config.metadata);
    let report = sync_tags(&pool, config, metadata.as_ref(), limit).await?;

    println!("sync-tags");
    println!("  processed: {}", report.processed);
    println!("ok");

    pool.close().await;
    Ok(())
}

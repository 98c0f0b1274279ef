//! Search index maintenance.
//!
//! `images_fts` holds one row per registered image (rowid = `images.seq`)
//! with the path, filename, and space-joined tags. It is never maintained
//! by triggers: the operations that change its inputs call into this module
//! explicitly, and [`rebuild`] recomputes it on demand.

use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::error::Result;

pub(crate) const CREATE_FTS_TABLE: &str = r#"
    CREATE VIRTUAL TABLE IF NOT EXISTS images_fts USING fts5(
        relpath,
        filename,
        tags,
        tokenize = 'trigram'
    )
"#;

// Space-joined tags of image `i`. A macro so const SQL can embed it.
macro_rules! tag_blob {
    () => {
        "COALESCE((SELECT group_concat(t.tag, ' ') FROM image_tags t WHERE t.relpath = i.relpath), '')"
    };
}

const TAG_BLOB: &str = tag_blob!();

pub(crate) const INSERT_MISSING_ROWS: &str = concat!(
    "INSERT INTO images_fts (rowid, relpath, filename, tags) SELECT i.seq, i.relpath, i.filename, ",
    tag_blob!(),
    " FROM images i WHERE i.seq NOT IN (SELECT rowid FROM images_fts)"
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RebuildMode {
    Incremental,
    Full,
}

#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub mode: RebuildMode,
    pub rows: i64,
}

/// Adds index rows for registered images that have none yet.
pub(crate) async fn insert_missing(conn: &mut SqliteConnection) -> Result<u64> {
    let done = sqlx::query(INSERT_MISSING_ROWS).execute(conn).await?;
    Ok(done.rows_affected())
}

/// Recomputes the index rows of the given images from their current tags.
pub(crate) async fn refresh_rows(conn: &mut SqliteConnection, relpaths: &[String]) -> Result<()> {
    for relpath in relpaths {
        sqlx::query("DELETE FROM images_fts WHERE rowid = (SELECT seq FROM images WHERE relpath = ?)")
            .bind(relpath)
            .execute(&mut *conn)
            .await?;
        sqlx::query(&format!(
            "INSERT INTO images_fts (rowid, relpath, filename, tags) \
             SELECT i.seq, i.relpath, i.filename, {} FROM images i WHERE i.relpath = ?",
            TAG_BLOB
        ))
        .bind(relpath)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Removes index rows whose image is no longer registered.
pub(crate) async fn delete_orphans(conn: &mut SqliteConnection) -> Result<u64> {
    let done = sqlx::query("DELETE FROM images_fts WHERE rowid NOT IN (SELECT seq FROM images)")
        .execute(conn)
        .await?;
    Ok(done.rows_affected())
}

async fn refresh_all(conn: &mut SqliteConnection) -> Result<i64> {
    delete_orphans(&mut *conn).await?;
    insert_missing(&mut *conn).await?;
    sqlx::query(&format!(
        "UPDATE images_fts SET tags = (SELECT {} FROM images i WHERE i.seq = images_fts.rowid)",
        TAG_BLOB
    ))
    .execute(&mut *conn)
    .await?;
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images_fts")
        .fetch_one(&mut *conn)
        .await?;
    Ok(rows)
}

/// Incremental mode recomputes every row's tag blob in place; full mode
/// drops and recreates the table first. Either way the index changes in a
/// single transaction, so concurrent searches never see it empty.
pub async fn rebuild(pool: &SqlitePool, mode: RebuildMode) -> Result<RebuildReport> {
    let mut tx = pool.begin().await?;
    if mode == RebuildMode::Full {
        sqlx::query("DROP TABLE IF EXISTS images_fts")
            .execute(&mut *tx)
            .await?;
        sqlx::query(CREATE_FTS_TABLE).execute(&mut *tx).await?;
    }
    let rows = refresh_all(&mut *tx).await?;
    tx.commit().await?;
    info!(?mode, rows, "search index rebuilt");
    Ok(RebuildReport { mode, rows })
}

pub async fn run_rebuild(config: &crate::config::Config, full: bool) -> anyhow::Result<()> {
    let pool = crate::migrate::open(config).await?;
    let mode = if full {
        RebuildMode::Full
    } else {
        RebuildMode::Incremental
    };
    let report = rebuild(&pool, mode).await?;
    println!("rebuild-index ({:?})", report.mode);
    println!("  rows: {}", report.rows);
    println!("ok");
    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_missing_uses_shared_tag_blob() {
        assert!(INSERT_MISSING_ROWS.contains(TAG_BLOB));
        assert!(INSERT_MISSING_ROWS.starts_with("INSERT INTO images_fts"));
    }
}

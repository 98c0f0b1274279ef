//! Per-image stats, leaderboard, and the health overview.
//!
//! `stats` shows one image with its recent rating history; `leaderboard`
//! ranks rated images. `health` summarizes what is on disk against what is
//! registered, which gives quick confidence that reindex has caught up.

use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::error::{GalleryError, Result};
use crate::gallery::Gallery;
use crate::models::{ImageRecord, RatingEvent};
use crate::rate::resolve_image;

/// Rating events returned with a single image.
pub const HISTORY_LIMIT: i64 = 100;
pub const DEFAULT_TOP: i64 = 50;
pub const MAX_TOP: i64 = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct ImageStats {
    pub image: ImageRecord,
    /// Newest first.
    pub ratings: Vec<RatingEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub ok: bool,
    pub gallery: String,
    pub allowed_extensions: Vec<String>,
    pub recursive: bool,
    pub top_categories: Vec<String>,
    pub total_files: usize,
    pub registered_images: i64,
    pub rated_images: i64,
    pub rating_events: i64,
    pub db: String,
}

pub async fn image_stats(pool: &SqlitePool, identifier: &str) -> Result<ImageStats> {
    let mut conn = pool.acquire().await?;
    let image = resolve_image(&mut *conn, identifier)
        .await?
        .ok_or_else(|| GalleryError::not_found(format!("image not found: {}", identifier)))?;

    let rows = sqlx::query(
        "SELECT id, image_id, score, note, ts FROM ratings WHERE image_id = ? ORDER BY id DESC LIMIT ?",
    )
    .bind(&image.id)
    .bind(HISTORY_LIMIT)
    .fetch_all(&mut *conn)
    .await?;

    let ratings = rows
        .iter()
        .map(|row| RatingEvent {
            id: row.get("id"),
            image_id: row.get("image_id"),
            score: row.get("score"),
            note: row.get("note"),
            timestamp: row.get("ts"),
        })
        .collect();

    Ok(ImageStats { image, ratings })
}

/// Images ranked by average, then by count. `top` is clamped to `1..=1000`.
pub async fn leaderboard(pool: &SqlitePool, top: i64) -> Result<Vec<ImageRecord>> {
    let sql = format!(
        "SELECT {} FROM images ORDER BY rating_avg DESC, rating_count DESC, relpath ASC LIMIT ?",
        ImageRecord::COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(top.clamp(1, MAX_TOP))
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(ImageRecord::from_row).collect())
}

pub fn categories(config: &Config) -> Result<Vec<String>> {
    Gallery::new(&config.gallery)?.top_categories()
}

pub async fn health(pool: &SqlitePool, config: &Config) -> Result<Health> {
    let gallery = Gallery::new(&config.gallery)?;
    let root_ok = gallery.root().is_dir();
    let (total_files, top_categories) = if root_ok {
        (gallery.all_files()?.len(), gallery.top_categories()?)
    } else {
        (0, Vec::new())
    };

    let registered_images: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images")
        .fetch_one(pool)
        .await?;
    let rated_images: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images WHERE rating_count > 0")
        .fetch_one(pool)
        .await?;
    let rating_events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ratings")
        .fetch_one(pool)
        .await?;

    Ok(Health {
        ok: root_ok,
        gallery: gallery.root().display().to_string(),
        allowed_extensions: config.gallery.allowed_extensions.clone(),
        recursive: config.gallery.recursive,
        top_categories,
        total_files,
        registered_images,
        rated_images,
        rating_events,
        db: config.db.path.display().to_string(),
    })
}

/// `stats --id` shows one image; otherwise the leaderboard.
pub async fn run_stats(config: &Config, id: Option<&str>, top: Option<i64>) -> anyhow::Result<()> {
    let pool = crate::migrate::open(config).await?;

    match id {
        Some(identifier) => {
            let stats = image_stats(&pool, identifier).await?;
            let image = &stats.image;
            println!("{}", image.relpath);
            println!("  id: {}", image.id);
            println!("  category: {}", image.category.as_deref().unwrap_or("-"));
            println!("  count: {}", image.rating_count);
            println!("  avg: {:.3}", image.rating_avg);
            if !stats.ratings.is_empty() {
                println!();
                println!("  {:<20} {:>6}   {}", "WHEN", "SCORE", "NOTE");
                for event in &stats.ratings {
                    println!(
                        "  {:<20} {:>6}   {}",
                        format_ts(event.timestamp),
                        event.score,
                        event.note.as_deref().unwrap_or("")
                    );
                }
            }
        }
        None => {
            let board = leaderboard(&pool, top.unwrap_or(DEFAULT_TOP)).await?;
            if board.is_empty() {
                println!("No images registered.");
            }
            for (i, image) in board.iter().enumerate() {
                println!(
                    "{:>4}. {:.3} ({}) {}",
                    i + 1,
                    image.rating_avg,
                    image.rating_count,
                    image.relpath
                );
            }
        }
    }

    pool.close().await;
    Ok(())
}

pub async fn run_health(config: &Config) -> anyhow::Result<()> {
    let pool = crate::migrate::open(config).await?;
    let report = health(&pool, config).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    pool.close().await;
    Ok(())
}

pub fn run_categories(config: &Config) -> anyhow::Result<()> {
    for name in categories(config)? {
        println!("{}", name);
    }
    Ok(())
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

//! Rating aggregation.
//!
//! Each rating appends an immutable event and folds the score into the
//! image's running mean. Once an image has enough ratings, the rounded
//! average is written back into the file's own metadata. A failed
//! write-back is logged and reported as `wrote_meta = false`; the rating
//! itself is already committed by then.

use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::warn;

use crate::config::Config;
use crate::error::{GalleryError, Result};
use crate::gallery::Gallery;
use crate::metadata::MetadataStore;
use crate::models::ImageRecord;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 5.0;

#[derive(Debug, Clone, Serialize)]
pub struct RateResponse {
    pub id: String,
    /// Running average, rounded to three decimals.
    pub avg: f64,
    pub count: i64,
    pub wrote_meta: bool,
}

/// Mean after folding `score` into an average over `old_count` ratings.
pub fn incremental_mean(old_avg: f64, old_count: i64, score: f64) -> f64 {
    let new_count = old_count + 1;
    (old_avg * old_count as f64 + score) / new_count as f64
}

/// Nearest integer score for file metadata, halves away from zero, in 0..=5.
pub fn rounded_score(avg: f64) -> u8 {
    avg.round().clamp(MIN_SCORE, MAX_SCORE) as u8
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Looks an identifier up as an id first, then as a relpath.
pub async fn resolve_image(
    conn: &mut SqliteConnection,
    identifier: &str,
) -> Result<Option<ImageRecord>> {
    for column in ["id", "relpath"] {
        let sql = format!(
            "SELECT {} FROM images WHERE {} = ?",
            ImageRecord::COLUMNS,
            column
        );
        let row = sqlx::query(&sql)
            .bind(identifier)
            .fetch_optional(&mut *conn)
            .await?;
        if let Some(row) = row {
            return Ok(Some(ImageRecord::from_row(&row)));
        }
    }
    Ok(None)
}

pub async fn rate(
    pool: &SqlitePool,
    config: &Config,
    metadata: &dyn MetadataStore,
    identifier: &str,
    score: f64,
    note: Option<&str>,
) -> Result<RateResponse> {
    if !score.is_finite() || !(MIN_SCORE..=MAX_SCORE).contains(&score) {
        return Err(GalleryError::validation(format!(
            "score must be between {} and {}, got {}",
            MIN_SCORE, MAX_SCORE, score
        )));
    }

    let image = {
        let mut conn = pool.acquire().await?;
        resolve_image(&mut *conn, identifier).await?
    }
    .ok_or_else(|| GalleryError::not_found(format!("image not found: {}", identifier)))?;

    let now = chrono::Utc::now().timestamp();

    // The event insert is the first statement so the transaction takes the
    // write lock before it reads the counters it updates.
    let mut tx = pool.begin().await?;

    sqlx::query("INSERT INTO ratings (image_id, score, note, ts) VALUES (?, ?, ?, ?)")
        .bind(&image.id)
        .bind(score)
        .bind(note)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    let current: Option<(i64, f64)> =
        sqlx::query_as("SELECT rating_count, rating_avg FROM images WHERE relpath = ?")
            .bind(&image.relpath)
            .fetch_optional(&mut *tx)
            .await?;
    let (old_count, old_avg) = current
        .ok_or_else(|| GalleryError::not_found(format!("image not found: {}", identifier)))?;

    let new_count = old_count + 1;
    let new_avg = incremental_mean(old_avg, old_count, score);

    sqlx::query("UPDATE images SET rating_count = ?, rating_avg = ? WHERE relpath = ?")
        .bind(new_count)
        .bind(new_avg)
        .bind(&image.relpath)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    let mut wrote_meta = false;
    if new_count >= config.rating.write_back_threshold {
        let gallery = Gallery::new(&config.gallery)?;
        let path = gallery.abs_path(&image.relpath);
        match metadata
            .write_rating(&path, rounded_score(new_avg), new_count)
            .await
        {
            Ok(()) => wrote_meta = true,
            Err(e) => warn!(path = %path.display(), error = %e, "metadata write-back failed"),
        }
    }

    Ok(RateResponse {
        id: image.id,
        avg: round3(new_avg),
        count: new_count,
        wrote_meta,
    })
}

pub async fn run_rate(
    config: &Config,
    identifier: &str,
    score: f64,
    note: Option<&str>,
) -> anyhow::Result<()> {
    let pool = crate::migrate::open(config).await?;
    let metadata = crate::metadata::from_config(&config.metadata);
    let response = rate(&pool, config, metadata.as_ref(), identifier, score, note).await?;

    println!("rated {}", response.id);
    println!("  avg: {}", response.avg);
    println!("  count: {}", response.count);
    println!("  wrote_meta: {}", response.wrote_meta);
    println!("ok");

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_mean_matches_arithmetic_mean() {
        let scores = [4.0, 2.0, 5.0, 0.5, 3.25];
        let mut avg = 0.0;
        for (n, s) in scores.iter().enumerate() {
            avg = incremental_mean(avg, n as i64, *s);
        }
        let expected = scores.iter().sum::<f64>() / scores.len() as f64;
        assert!((avg - expected).abs() < 1e-9);
    }

    #[test]
    fn test_four_then_two_is_three() {
        let avg = incremental_mean(incremental_mean(0.0, 0, 4.0), 1, 2.0);
        assert!((avg - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_rounded_score() {
        assert_eq!(rounded_score(0.0), 0);
        assert_eq!(rounded_score(2.49), 2);
        assert_eq!(rounded_score(2.5), 3);
        assert_eq!(rounded_score(4.6), 5);
        assert_eq!(rounded_score(5.0), 5);
    }

    #[test]
    fn test_round3() {
        assert_eq!(round3(10.0 / 3.0), 3.333);
        assert_eq!(round3(2.0), 2.0);
    }
}

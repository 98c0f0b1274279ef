//! Random picks biased toward under-rated images.
//!
//! A pick either samples the ordered search window (when a query is given)
//! or lists files from disk, optionally scoped to a weighted category
//! expression such as `landscape:3,portrait:1`, and then applies a bias
//! policy over the candidates' rating counts:
//!
//! | Mode | Policy |
//! |------|--------|
//! | `off` | uniform |
//! | `min` | uniform among the candidates with the lowest count |
//! | `weighted` | weight `1 / (count + 1)^alpha` |
//!
//! The chosen file is registered on the fly if the registry has never seen
//! it, and its `last_seen_ts` is stamped.

use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::debug;

use crate::config::Config;
use crate::error::{GalleryError, Result};
use crate::fts;
use crate::gallery::{filename_of, image_id_for, top_category, url_for, validate_category_name, Gallery};
use crate::models::{BiasMode, ImageRecord};
use crate::search;

/// Lower bound applied to `alpha` in weighted mode.
pub const MIN_ALPHA: f64 = 1e-4;

/// Relpaths per count lookup statement.
const COUNT_CHUNK: usize = 900;

#[derive(Debug, Clone, Default)]
pub struct PickRequest {
    pub category: Option<String>,
    pub query: Option<String>,
    pub bias: Option<String>,
    pub alpha: Option<f64>,
}

/// What a client receives for a pick.
#[derive(Debug, Clone, Serialize)]
pub struct PickResponse {
    pub id: String,
    pub relpath: String,
    pub filename: String,
    pub category: Option<String>,
    pub url: String,
}

impl PickResponse {
    pub fn new(image: &ImageRecord, static_prefix: &str) -> Self {
        Self {
            id: image.id.clone(),
            relpath: image.relpath.clone(),
            filename: image.filename.clone(),
            category: image.category.clone(),
            url: url_for(static_prefix, &image.relpath),
        }
    }
}

/// Parses `name[:weight],...`. Weights that are missing, non-integer, or
/// below 1 become 1. Fails when a name is malformed or nothing is listed.
pub fn parse_category_expr(expr: &str) -> Result<Vec<(String, u32)>> {
    let mut groups = Vec::new();
    for item in expr.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, weight) = match item.rsplit_once(':') {
            Some((name, weight)) => {
                let weight = weight
                    .trim()
                    .parse::<i64>()
                    .ok()
                    .filter(|w| *w >= 1)
                    .map(|w| w.min(u32::MAX as i64) as u32)
                    .unwrap_or(1);
                (name, weight)
            }
            None => (item, 1),
        };
        groups.push((validate_category_name(name)?, weight));
    }
    if groups.is_empty() {
        return Err(GalleryError::validation(format!(
            "category expression '{}' lists no categories",
            expr
        )));
    }
    Ok(groups)
}

/// Index of the category to try first, drawn by weight.
pub fn choose_category<R: Rng + ?Sized>(groups: &[(String, u32)], rng: &mut R) -> usize {
    match WeightedIndex::new(groups.iter().map(|(_, w)| *w)) {
        Ok(dist) => dist.sample(rng),
        Err(_) => rng.random_range(0..groups.len()),
    }
}

/// Applies a bias policy to a non-empty list of rating counts.
pub fn choose_index<R: Rng + ?Sized>(
    counts: &[i64],
    bias: BiasMode,
    alpha: f64,
    rng: &mut R,
) -> usize {
    match bias {
        BiasMode::Off => rng.random_range(0..counts.len()),
        BiasMode::Min => {
            let min = counts.iter().copied().min().unwrap_or(0);
            let least: Vec<usize> = counts
                .iter()
                .enumerate()
                .filter(|(_, c)| **c == min)
                .map(|(i, _)| i)
                .collect();
            least[rng.random_range(0..least.len())]
        }
        BiasMode::Weighted => {
            let alpha = alpha.max(MIN_ALPHA);
            let weights: Vec<f64> = counts
                .iter()
                .map(|c| 1.0 / ((*c as f64) + 1.0).powf(alpha))
                .collect();
            match WeightedIndex::new(&weights) {
                Ok(dist) => dist.sample(rng),
                // Every weight underflowed to zero.
                Err(_) => rng.random_range(0..counts.len()),
            }
        }
    }
}

/// Rating counts for the given relpaths; unregistered files count 0.
pub async fn counts_for(pool: &SqlitePool, relpaths: &[String]) -> Result<Vec<i64>> {
    let mut known: HashMap<String, i64> = HashMap::new();
    for chunk in relpaths.chunks(COUNT_CHUNK) {
        let sql = format!(
            "SELECT relpath, rating_count FROM images WHERE relpath IN ({})",
            vec!["?"; chunk.len()].join(",")
        );
        let mut query = sqlx::query_as::<_, (String, i64)>(&sql);
        for relpath in chunk {
            query = query.bind(relpath);
        }
        known.extend(query.fetch_all(pool).await?);
    }
    Ok(relpaths
        .iter()
        .map(|r| known.get(r).copied().unwrap_or(0))
        .collect())
}

/// Registers `relpath` if needed, stamps `last_seen_ts`, and returns the row.
pub async fn ensure_record(pool: &SqlitePool, relpath: &str) -> Result<ImageRecord> {
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO images (id, relpath, category, filename, added_ts, last_seen_ts)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(relpath) DO NOTHING
        "#,
    )
    .bind(image_id_for(relpath))
    .bind(relpath)
    .bind(top_category(relpath))
    .bind(filename_of(relpath))
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if inserted > 0 {
        fts::refresh_rows(&mut *tx, &[relpath.to_string()]).await?;
    } else {
        sqlx::query("UPDATE images SET last_seen_ts = ? WHERE relpath = ?")
            .bind(now)
            .bind(relpath)
            .execute(&mut *tx)
            .await?;
    }

    let row = sqlx::query(&format!(
        "SELECT {} FROM images WHERE relpath = ?",
        ImageRecord::COLUMNS
    ))
    .bind(relpath)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(ImageRecord::from_row(&row))
}

fn resolve_bias(config: &Config, request: &PickRequest) -> Result<(BiasMode, f64)> {
    let bias = match request.bias.as_deref().map(str::trim) {
        Some(b) if !b.is_empty() => b.parse::<BiasMode>().map_err(GalleryError::Validation)?,
        _ => config.default_bias(),
    };
    let alpha = request.alpha.unwrap_or(config.selection.alpha);
    if !alpha.is_finite() {
        return Err(GalleryError::validation("alpha must be a finite number"));
    }
    Ok((bias, alpha.max(MIN_ALPHA)))
}

/// Files of the first non-empty category, trying the weighted draw first and
/// then the rest of the list in its original order.
fn category_candidates<R: Rng + ?Sized>(
    gallery: &Gallery,
    groups: &[(String, u32)],
    rng: &mut R,
) -> Result<Vec<String>> {
    let first = choose_category(groups, rng);
    let files = gallery.category_files(&groups[first].0)?;
    if !files.is_empty() {
        return Ok(files);
    }

    for (i, (name, _)) in groups.iter().enumerate() {
        if i == first {
            continue;
        }
        let files = gallery.category_files(name)?;
        if !files.is_empty() {
            debug!(chosen = %groups[first].0, fallback = %name, "category fallback");
            return Ok(files);
        }
    }

    Err(GalleryError::not_found("no images under the given categories"))
}

/// Picks one image. See the module docs for the policy.
pub async fn pick<R: Rng + ?Sized>(
    pool: &SqlitePool,
    config: &Config,
    request: &PickRequest,
    rng: &mut R,
) -> Result<ImageRecord> {
    let (bias, alpha) = resolve_bias(config, request)?;

    if let Some(query) = request.query.as_deref().filter(|q| !q.trim().is_empty()) {
        let tokens = search::tokenize(query);
        let window = search::matching_images(
            pool,
            &tokens,
            config.search.use_fts(),
            config.selection.window,
        )
        .await?;
        if window.is_empty() {
            return Err(GalleryError::not_found("no images matched the query"));
        }
        let hit = &window[rng.random_range(0..window.len())];
        return ensure_record(pool, &hit.relpath).await;
    }

    let gallery = Gallery::new(&config.gallery)?;

    let candidates = match request.category.as_deref().filter(|c| !c.trim().is_empty()) {
        Some(expr) => {
            let groups = parse_category_expr(expr)?;
            category_candidates(&gallery, &groups, rng)?
        }
        None => gallery.all_files()?,
    };
    if candidates.is_empty() {
        return Err(GalleryError::not_found("no images in gallery"));
    }

    let counts = counts_for(pool, &candidates).await?;
    let idx = choose_index(&counts, bias, alpha, rng);
    ensure_record(pool, &candidates[idx]).await
}

pub async fn run_pick(config: &Config, request: &PickRequest) -> anyhow::Result<()> {
    let pool = crate::migrate::open(config).await?;
    let mut rng = StdRng::from_os_rng();
    let image = pick(&pool, config, request, &mut rng).await?;
    let response = PickResponse::new(&image, &config.server.static_prefix);

    println!("{}", serde_json::to_string_pretty(&response)?);

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_parse_weights() {
        let groups = parse_category_expr("landscape:3, portrait , city:0, sea:-2, sky:x").unwrap();
        assert_eq!(
            groups,
            vec![
                ("landscape".to_string(), 3),
                ("portrait".to_string(), 1),
                ("city".to_string(), 1),
                ("sea".to_string(), 1),
                ("sky".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_parse_multi_level_category() {
        let groups = parse_category_expr("wallpaper/landscape:2").unwrap();
        assert_eq!(groups, vec![("wallpaper/landscape".to_string(), 2)]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_category_expr(" , ,").is_err());
        assert!(parse_category_expr("../secret").is_err());
        assert!(parse_category_expr(":3").is_err());
    }

    #[test]
    fn test_choose_category_respects_weights() {
        let groups = vec![("a".to_string(), 9), ("b".to_string(), 1)];
        let mut rng = rng();
        let hits_a = (0..2000)
            .filter(|_| choose_category(&groups, &mut rng) == 0)
            .count();
        assert!(hits_a > 1600 && hits_a < 1950, "hits_a = {}", hits_a);
    }

    #[test]
    fn test_min_only_returns_least_rated() {
        let counts = [0, 2, 1];
        let mut rng = rng();
        for _ in 0..500 {
            assert_eq!(choose_index(&counts, BiasMode::Min, 1.0, &mut rng), 0);
        }
    }

    #[test]
    fn test_min_is_uniform_among_ties() {
        let counts = [3, 1, 1, 5, 1];
        let mut rng = rng();
        let mut seen = [0usize; 5];
        for _ in 0..3000 {
            seen[choose_index(&counts, BiasMode::Min, 1.0, &mut rng)] += 1;
        }
        assert_eq!(seen[0] + seen[3], 0);
        for i in [1, 2, 4] {
            assert!(seen[i] > 850 && seen[i] < 1150, "seen = {:?}", seen);
        }
    }

    #[test]
    fn test_weighted_prefers_low_counts() {
        let counts = [0, 9];
        let mut rng = rng();
        let low = (0..4000)
            .filter(|_| choose_index(&counts, BiasMode::Weighted, 1.0, &mut rng) == 0)
            .count();
        // Weights 1 and 1/10: expect about 91% low.
        assert!(low > 3500 && low < 3800, "low = {}", low);
    }

    #[test]
    fn test_weighted_alpha_zero_is_nearly_uniform() {
        let counts = [0, 50, 1000];
        let mut rng = rng();
        let mut seen = [0usize; 3];
        for _ in 0..6000 {
            seen[choose_index(&counts, BiasMode::Weighted, 0.0, &mut rng)] += 1;
        }
        for n in seen {
            assert!(n > 1800 && n < 2200, "seen = {:?}", seen);
        }
    }

    #[test]
    fn test_weighted_survives_underflow() {
        let counts = [i64::MAX / 2, i64::MAX / 2];
        let mut rng = rng();
        let idx = choose_index(&counts, BiasMode::Weighted, 1e6, &mut rng);
        assert!(idx < 2);
    }

    #[test]
    fn test_off_covers_every_index() {
        let counts = [5, 0, 9];
        let mut rng = rng();
        let mut seen = [false; 3];
        for _ in 0..200 {
            seen[choose_index(&counts, BiasMode::Off, 1.0, &mut rng)] = true;
        }
        assert_eq!(seen, [true, true, true]);
    }
}

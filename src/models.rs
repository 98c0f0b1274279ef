//! Core data models.
//!
//! These types are what the registry, search, selection, and rating
//! operations hand back to callers. Each mirrors one table (or one query
//! shape) with typed fields.

use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::fmt;
use std::str::FromStr;

/// One registered image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRecord {
    pub id: String,
    pub relpath: String,
    pub category: Option<String>,
    pub filename: String,
    pub rating_count: i64,
    pub rating_avg: f64,
    pub last_seen_ts: Option<i64>,
}

impl ImageRecord {
    pub(crate) const COLUMNS: &'static str =
        "id, relpath, category, filename, rating_count, rating_avg, last_seen_ts";

    pub(crate) fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            relpath: row.get("relpath"),
            category: row.get("category"),
            filename: row.get("filename"),
            rating_count: row.get("rating_count"),
            rating_avg: row.get("rating_avg"),
            last_seen_ts: row.get("last_seen_ts"),
        }
    }
}

/// An immutable entry in the rating log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingEvent {
    pub id: i64,
    pub image_id: String,
    pub score: f64,
    pub note: Option<String>,
    pub timestamp: i64,
}

/// One tag attached to one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagAssociation {
    pub relpath: String,
    pub tag: String,
    pub normalized_tag: String,
}

/// A search result row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub relpath: String,
    pub id: String,
    pub filename: String,
    pub category: Option<String>,
    pub count: i64,
    pub avg: f64,
}

/// Selection policy over a candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BiasMode {
    /// Uniform random.
    Off,
    /// Uniform among the least-rated candidates.
    Min,
    /// Inverse-count weighted, sharpened by `alpha`.
    Weighted,
}

impl FromStr for BiasMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" => Ok(BiasMode::Off),
            "min" => Ok(BiasMode::Min),
            "weighted" => Ok(BiasMode::Weighted),
            other => Err(format!(
                "unknown bias mode '{}': use off, min, or weighted",
                other
            )),
        }
    }
}

impl fmt::Display for BiasMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BiasMode::Off => "off",
            BiasMode::Min => "min",
            BiasMode::Weighted => "weighted",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bias_mode_parse_is_case_insensitive() {
        assert_eq!("MIN".parse::<BiasMode>().unwrap(), BiasMode::Min);
        assert_eq!(" weighted ".parse::<BiasMode>().unwrap(), BiasMode::Weighted);
        assert_eq!("off".parse::<BiasMode>().unwrap(), BiasMode::Off);
        assert!("random".parse::<BiasMode>().is_err());
    }

    #[test]
    fn test_bias_mode_display_round_trips() {
        for mode in [BiasMode::Off, BiasMode::Min, BiasMode::Weighted] {
            assert_eq!(mode.to_string().parse::<BiasMode>().unwrap(), mode);
        }
    }
}

//! Tags and ratings stored inside the image files themselves.
//!
//! The gallery treats the tool that reads and writes embedded metadata as an
//! external collaborator behind [`MetadataStore`]. Reading never fails from
//! the caller's point of view (a broken file simply has no tags); writing
//! reports an explicit [`MetadataError`] that the caller logs.
//!
//! The rating write-back stores three marker subjects next to the user's
//! own tags: `rated`, `score:<n>`, and `count:<n>`. These markers are
//! reserved: [`clean_tags`] strips them so they never reach the tag index.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;

use crate::config::MetadataConfig;

const RESERVED_FIXED: &str = "rated";
const RESERVED_PREFIXES: &[&str] = &["score:", "count:"];

/// True for the markers the rating write-back owns.
pub fn is_reserved_tag(tag: &str) -> bool {
    let lower = tag.trim().to_lowercase();
    lower == RESERVED_FIXED || RESERVED_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Normalizes a raw tag list for the tag index: trims, drops empty and
/// reserved entries, and removes exact duplicates keeping first order.
pub fn clean_tags(raw: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty() && !is_reserved_tag(t))
        .filter(|t| seen.insert(t.to_string()))
        .map(|t| t.to_string())
        .collect()
}

/// Merges the latest rating markers into an existing subject list, keeping
/// every non-reserved subject in its original order.
pub fn merge_rating_subjects(existing: &[String], rounded: u8, count: i64) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut merged: Vec<String> = existing
        .iter()
        .filter(|s| !s.is_empty() && !is_reserved_tag(s))
        .filter(|s| seen.insert(s.to_string()))
        .cloned()
        .collect();
    merged.push(RESERVED_FIXED.to_string());
    merged.push(format!("score:{}", rounded));
    merged.push(format!("count:{}", count));
    merged
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("file does not exist: {0}")]
    Missing(PathBuf),
    #[error("metadata backend is disabled")]
    Disabled,
    #[error("failed to run metadata tool: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("metadata tool failed: {0}")]
    Tool(String),
}

/// Reads and writes tags embedded in image files.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Raw subject list of the file, or empty on any failure.
    async fn read_tags(&self, path: &Path) -> Vec<String>;

    /// Stores the rounded score and count, preserving unrelated tags.
    async fn write_rating(&self, path: &Path, rounded: u8, count: i64)
        -> Result<(), MetadataError>;
}

/// Backend used when `metadata.backend = "none"`.
pub struct NoMetadata;

#[async_trait]
impl MetadataStore for NoMetadata {
    async fn read_tags(&self, _path: &Path) -> Vec<String> {
        Vec::new()
    }

    async fn write_rating(
        &self,
        _path: &Path,
        _rounded: u8,
        _count: i64,
    ) -> Result<(), MetadataError> {
        Err(MetadataError::Disabled)
    }
}

/// XMP subject/rating access through the `exiftool` program.
pub struct Exiftool {
    program: PathBuf,
}

impl Exiftool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn subjects(&self, path: &Path) -> Result<Vec<String>, MetadataError> {
        let output = Command::new(&self.program)
            .arg("-j")
            .arg("-s")
            .arg("-XMP:Subject")
            .arg(path)
            .output()
            .await?;
        if !output.status.success() {
            return Err(MetadataError::Tool(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(parse_subjects(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Extracts `Subject` from exiftool's `-j` output. The field may be a list
/// or a single comma-separated string.
pub fn parse_subjects(json: &str) -> Vec<String> {
    let value: serde_json::Value = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };
    let subject = value
        .as_array()
        .and_then(|entries| entries.first())
        .and_then(|entry| entry.get("Subject"));

    match subject {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(serde_json::Value::String(s)) => s
            .split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect(),
        Some(serde_json::Value::Number(n)) => vec![n.to_string()],
        _ => Vec::new(),
    }
}

#[async_trait]
impl MetadataStore for Exiftool {
    async fn read_tags(&self, path: &Path) -> Vec<String> {
        self.subjects(path).await.unwrap_or_default()
    }

    async fn write_rating(
        &self,
        path: &Path,
        rounded: u8,
        count: i64,
    ) -> Result<(), MetadataError> {
        if !path.exists() {
            return Err(MetadataError::Missing(path.to_path_buf()));
        }

        let existing = self.subjects(path).await?;
        let subjects = merge_rating_subjects(&existing, rounded, count);

        let mut cmd = Command::new(&self.program);
        cmd.arg("-overwrite_original")
            .arg(format!("-XMP:Rating={}", rounded))
            .arg("-XMP:Subject=");
        for subject in &subjects {
            cmd.arg(format!("-XMP:Subject+={}", subject));
        }
        cmd.arg(path);

        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(MetadataError::Tool(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

/// Builds the configured backend.
pub fn from_config(config: &MetadataConfig) -> Arc<dyn MetadataStore> {
    match config.backend.as_str() {
        "none" => Arc::new(NoMetadata),
        _ => Arc::new(Exiftool::new(config.exiftool.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_reserved_forms() {
        assert!(is_reserved_tag("rated"));
        assert!(is_reserved_tag("Rated"));
        assert!(is_reserved_tag("score:4"));
        assert!(is_reserved_tag("COUNT:12"));
        assert!(!is_reserved_tag("underrated"));
        assert!(!is_reserved_tag("score"));
        assert!(!is_reserved_tag("beach"));
    }

    #[test]
    fn test_clean_tags_strips_markers_and_duplicates() {
        let raw = tags(&[" beach ", "rated", "score:5", "sunset", "beach", "", "count:3"]);
        assert_eq!(clean_tags(&raw), tags(&["beach", "sunset"]));
    }

    #[test]
    fn test_merge_replaces_only_markers() {
        let existing = tags(&["beach", "rated", "score:2", "count:1", "sunset", "beach"]);
        assert_eq!(
            merge_rating_subjects(&existing, 4, 2),
            tags(&["beach", "sunset", "rated", "score:4", "count:2"])
        );
    }

    #[test]
    fn test_parse_subjects_list() {
        let json = r#"[{"SourceFile":"a.jpg","Subject":["beach","sunset"]}]"#;
        assert_eq!(parse_subjects(json), tags(&["beach", "sunset"]));
    }

    #[test]
    fn test_parse_subjects_comma_string() {
        let json = r#"[{"SourceFile":"a.jpg","Subject":"beach, sunset"}]"#;
        assert_eq!(parse_subjects(json), tags(&["beach", "sunset"]));
    }

    #[test]
    fn test_parse_subjects_missing_or_garbage() {
        assert!(parse_subjects(r#"[{"SourceFile":"a.jpg"}]"#).is_empty());
        assert!(parse_subjects("not json").is_empty());
        assert!(parse_subjects("[]").is_empty());
    }

    #[tokio::test]
    async fn test_disabled_backend() {
        let store = NoMetadata;
        assert!(store.read_tags(Path::new("a.jpg")).await.is_empty());
        assert!(matches!(
            store.write_rating(Path::new("a.jpg"), 3, 1).await,
            Err(MetadataError::Disabled)
        ));
    }
}

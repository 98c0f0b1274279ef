//! TOML configuration.
//!
//! The configuration is parsed once at startup into an immutable [`Config`]
//! and passed by reference to every operation. A small set of environment
//! variables can override file values, see [`Config::apply_env_overrides`].

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::GalleryError;
use crate::models::BiasMode;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    pub gallery: GalleryConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub rating: RatingConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/picrater.sqlite")
}
fn default_busy_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct GalleryConfig {
    pub root: PathBuf,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
}

fn default_allowed_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "webp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_recursive() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct SelectionConfig {
    #[serde(default = "default_bias")]
    pub bias: String,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Size of the ordered candidate window for query picks and search.
    #[serde(default = "default_window")]
    pub window: i64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            bias: default_bias(),
            alpha: default_alpha(),
            window: default_window(),
        }
    }
}

fn default_bias() -> String {
    "min".to_string()
}
fn default_alpha() -> f64 {
    1.0
}
fn default_window() -> i64 {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_search_mode")]
    pub mode: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            mode: default_search_mode(),
        }
    }
}

fn default_search_mode() -> String {
    "fts".to_string()
}

impl SearchConfig {
    pub fn use_fts(&self) -> bool {
        self.mode == "fts"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RatingConfig {
    #[serde(default = "default_write_back_threshold")]
    pub write_back_threshold: i64,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            write_back_threshold: default_write_back_threshold(),
        }
    }
}

fn default_write_back_threshold() -> i64 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetadataConfig {
    #[serde(default = "default_metadata_backend")]
    pub backend: String,
    #[serde(default = "default_exiftool")]
    pub exiftool: PathBuf,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            backend: default_metadata_backend(),
            exiftool: default_exiftool(),
        }
    }
}

fn default_metadata_backend() -> String {
    "exiftool".to_string()
}
fn default_exiftool() -> PathBuf {
    PathBuf::from("exiftool")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_static_prefix")]
    pub static_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            static_prefix: default_static_prefix(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_static_prefix() -> String {
    "/static".to_string()
}

impl Config {
    /// Builds a config for an in-process gallery with every other section at
    /// its default. Used by tests and embedders that skip the TOML file.
    pub fn for_gallery(root: impl Into<PathBuf>, db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
                ..DbConfig::default()
            },
            gallery: GalleryConfig {
                root: root.into(),
                allowed_extensions: default_allowed_extensions(),
                recursive: default_recursive(),
            },
            selection: SelectionConfig::default(),
            search: SearchConfig::default(),
            rating: RatingConfig::default(),
            metadata: MetadataConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Default bias mode from `[selection]`. Validated at load time.
    pub fn default_bias(&self) -> BiasMode {
        self.selection.bias.parse().unwrap_or(BiasMode::Min)
    }

    /// Applies environment-variable overrides on top of the file.
    ///
    /// Reads through `lookup` so callers (and tests) decide where values come
    /// from; `load_config` passes `std::env::var`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), GalleryError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("GALLERY_DIR") {
            self.gallery.root = PathBuf::from(root);
        }
        if let Some(list) = lookup("ALLOWED_SUFFIXES") {
            self.gallery.allowed_extensions = list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(flag) = lookup("RECURSIVE") {
            self.gallery.recursive =
                matches!(flag.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(bias) = lookup("PICK_BIAS") {
            self.selection.bias = bias.trim().to_lowercase();
        }
        if let Some(alpha) = lookup("PICK_BIAS_ALPHA") {
            self.selection.alpha = alpha.trim().parse().map_err(|_| {
                GalleryError::Config(format!("PICK_BIAS_ALPHA is not a number: '{}'", alpha))
            })?;
        }
        if let Some(threshold) = lookup("WRITE_META_MIN_COUNT") {
            self.rating.write_back_threshold = threshold.trim().parse().map_err(|_| {
                GalleryError::Config(format!(
                    "WRITE_META_MIN_COUNT is not an integer: '{}'",
                    threshold
                ))
            })?;
        }
        if let Some(prefix) = lookup("STATIC_PREFIX") {
            self.server.static_prefix = prefix;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), GalleryError> {
        if self.gallery.root.as_os_str().is_empty() {
            return Err(GalleryError::Config("gallery.root must be set".into()));
        }
        if self.gallery.allowed_extensions.is_empty() {
            return Err(GalleryError::Config(
                "gallery.allowed_extensions must not be empty".into(),
            ));
        }
        if self.selection.bias.parse::<BiasMode>().is_err() {
            return Err(GalleryError::Config(format!(
                "Unknown selection.bias: '{}'. Must be off, min, or weighted.",
                self.selection.bias
            )));
        }
        if !self.selection.alpha.is_finite() || self.selection.alpha < 0.0 {
            return Err(GalleryError::Config(
                "selection.alpha must be a finite number >= 0".into(),
            ));
        }
        if self.selection.window < 1 {
            return Err(GalleryError::Config("selection.window must be >= 1".into()));
        }
        match self.search.mode.as_str() {
            "fts" | "substring" => {}
            other => {
                return Err(GalleryError::Config(format!(
                    "Unknown search.mode: '{}'. Must be fts or substring.",
                    other
                )))
            }
        }
        match self.metadata.backend.as_str() {
            "exiftool" | "none" => {}
            other => {
                return Err(GalleryError::Config(format!(
                    "Unknown metadata.backend: '{}'. Must be exiftool or none.",
                    other
                )))
            }
        }
        let prefix = &self.server.static_prefix;
        if !prefix.starts_with('/') || prefix.trim_end_matches('/').is_empty() {
            return Err(GalleryError::Config(
                "server.static_prefix must start with '/' and name a path segment".into(),
            ));
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config, GalleryError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        GalleryError::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    let mut config: Config = toml::from_str(&content)
        .map_err(|e| GalleryError::Config(format!("Failed to parse config file: {}", e)))?;

    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(toml_src: &str) -> Config {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse("[gallery]\nroot = \"/srv/pics\"\n");
        assert_eq!(cfg.gallery.root, PathBuf::from("/srv/pics"));
        assert!(cfg.gallery.recursive);
        assert_eq!(cfg.selection.bias, "min");
        assert_eq!(cfg.selection.window, 200);
        assert_eq!(cfg.rating.write_back_threshold, 1);
        assert_eq!(cfg.db.busy_timeout_secs, 5);
        assert!(cfg.search.use_fts());
        cfg.validate().unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = parse("[gallery]\nroot = \"/srv/pics\"\n");
        let env: HashMap<&str, &str> = [
            ("GALLERY_DIR", "/other"),
            ("ALLOWED_SUFFIXES", ".jpg, .PNG"),
            ("RECURSIVE", "no"),
            ("PICK_BIAS", "Weighted"),
            ("PICK_BIAS_ALPHA", "2.5"),
            ("WRITE_META_MIN_COUNT", "3"),
        ]
        .into_iter()
        .collect();
        cfg.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(cfg.gallery.root, PathBuf::from("/other"));
        assert_eq!(cfg.gallery.allowed_extensions, vec![".jpg", ".PNG"]);
        assert!(!cfg.gallery.recursive);
        assert_eq!(cfg.default_bias(), BiasMode::Weighted);
        assert!((cfg.selection.alpha - 2.5).abs() < 1e-12);
        assert_eq!(cfg.rating.write_back_threshold, 3);
    }

    #[test]
    fn test_bad_numeric_override_is_an_error() {
        let mut cfg = parse("[gallery]\nroot = \"/srv/pics\"\n");
        let err = cfg
            .apply_env_overrides(|k| (k == "PICK_BIAS_ALPHA").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("PICK_BIAS_ALPHA"));
    }

    #[test]
    fn test_validate_rejects_unknown_bias() {
        let cfg = parse("[gallery]\nroot = \"/srv/pics\"\n[selection]\nbias = \"loud\"\n");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_relative_static_prefix() {
        let cfg = parse("[gallery]\nroot = \"/srv/pics\"\n[server]\nstatic_prefix = \"static\"\n");
        assert!(cfg.validate().is_err());
        let cfg = parse("[gallery]\nroot = \"/srv/pics\"\n[server]\nstatic_prefix = \"/\"\n");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_example_config_is_valid() {
        let cfg = parse(include_str!("../config/picrater.example.toml"));
        cfg.validate().unwrap();
        assert_eq!(cfg.metadata.backend, "exiftool");
        assert_eq!(cfg.server.static_prefix, "/static");
    }
}

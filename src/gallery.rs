//! The gallery on disk.
//!
//! Walks the gallery root, filters by the extension allow-list, and derives
//! everything the registry keys on: the POSIX-style `relpath`, the
//! digest-based `id`, the top-level `category`, and the filename.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::config::GalleryConfig;
use crate::error::{GalleryError, Result};

/// Hex characters kept from the SHA-256 of the relpath (128 bits).
pub const ID_HEX_LEN: usize = 32;

/// Derives the stable image id from its relpath.
pub fn image_id_for(relpath: &str) -> String {
    let digest = Sha256::digest(relpath.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(ID_HEX_LEN);
    id
}

/// First path segment of a relpath, or `None` for files at the root.
pub fn top_category(relpath: &str) -> Option<String> {
    relpath
        .split_once('/')
        .map(|(first, _)| first.to_string())
        .filter(|first| !first.is_empty())
}

pub fn filename_of(relpath: &str) -> String {
    relpath.rsplit('/').next().unwrap_or(relpath).to_string()
}

/// Builds the public URL of an image under the static prefix.
pub fn url_for(static_prefix: &str, relpath: &str) -> String {
    let encoded: Vec<String> = relpath.split('/').map(percent_encode).collect();
    format!("{}/{}", static_prefix.trim_end_matches('/'), encoded.join("/"))
}

fn percent_encode(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Checks a category name from a selection expression and returns it in
/// normalized form (no surrounding slashes).
pub fn validate_category_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.starts_with('/') || trimmed.starts_with('\\') {
        return Err(GalleryError::validation(format!(
            "category '{}' must be relative to the gallery root",
            name
        )));
    }
    let normalized = trimmed.trim_end_matches('/');
    if normalized.is_empty() {
        return Err(GalleryError::validation("category name must not be empty"));
    }
    if normalized
        .split('/')
        .any(|segment| segment.trim().is_empty() || segment == "..")
    {
        return Err(GalleryError::validation(format!(
            "category '{}' is not a valid gallery path",
            name
        )));
    }
    Ok(normalized.to_string())
}

/// Read-only view of the gallery directory.
#[derive(Debug, Clone)]
pub struct Gallery {
    root: PathBuf,
    recursive: bool,
    matcher: GlobSet,
}

impl Gallery {
    pub fn new(config: &GalleryConfig) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for ext in &config.allowed_extensions {
            let ext = ext.trim().trim_start_matches('.');
            if ext.is_empty() {
                continue;
            }
            let glob = GlobBuilder::new(&format!("*.{}", ext))
                .case_insensitive(true)
                .build()
                .map_err(|e| GalleryError::Config(format!("bad extension '{}': {}", ext, e)))?;
            builder.add(glob);
        }
        let matcher = builder
            .build()
            .map_err(|e| GalleryError::Config(format!("bad extension list: {}", e)))?;

        Ok(Self {
            root: config.root.clone(),
            recursive: config.recursive,
            matcher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_allowed(&self, filename: &str) -> bool {
        self.matcher.is_match(filename)
    }

    /// Absolute path of an image on disk.
    pub fn abs_path(&self, relpath: &str) -> PathBuf {
        relpath
            .split('/')
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    fn ensure_root(&self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(GalleryError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("gallery root does not exist: {}", self.root.display()),
            )));
        }
        Ok(())
    }

    /// Every allowed file under the root, as sorted relpaths.
    pub fn all_files(&self) -> Result<Vec<String>> {
        self.ensure_root()?;
        self.walk(&self.root)
    }

    /// Every allowed file under a category directory. A category that does
    /// not exist yields no files.
    pub fn category_files(&self, category: &str) -> Result<Vec<String>> {
        self.ensure_root()?;
        let name = validate_category_name(category)?;
        let base = self.abs_path(&name);
        if !base.is_dir() {
            return Ok(Vec::new());
        }
        self.walk(&base)
    }

    /// Sorted names of the top-level directories.
    pub fn top_categories(&self) -> Result<Vec<String>> {
        self.ensure_root()?;
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn walk(&self, base: &Path) -> Result<Vec<String>> {
        let mut walker = WalkDir::new(base).follow_links(false).min_depth(1);
        if !self.recursive {
            walker = walker.max_depth(1);
        }

        let mut relpaths = Vec::new();
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let filename = entry.file_name().to_string_lossy();
            if !self.is_allowed(&filename) {
                continue;
            }
            if let Some(relpath) = self.relpath_of(entry.path()) {
                relpaths.push(relpath);
            }
        }

        relpaths.sort();
        Ok(relpaths)
    }

    /// POSIX-style path of `path` relative to the root.
    pub fn relpath_of(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let segments: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().to_string()),
                _ => None,
            })
            .collect();
        if segments.is_empty() {
            None
        } else {
            Some(segments.join("/"))
        }
    }
}

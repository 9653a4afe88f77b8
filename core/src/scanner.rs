use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::config::IndexConfig;
use crate::grammar::GrammarRegistry;

// ---------------------------------------------------------------------------
// ScannedFile: one parseable candidate discovered on disk
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// Root-relative path with `/` separators.
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub size: u64,
}

// ---------------------------------------------------------------------------
// SourceScanner
// ---------------------------------------------------------------------------

/// Walks a project tree and yields files the grammar registry can parse,
/// skipping ignored directories.
pub struct SourceScanner {
    ignore_dirs: HashSet<String>,
    extensions: Vec<String>,
}

impl SourceScanner {
    pub fn new(config: &IndexConfig, registry: &GrammarRegistry) -> Self {
        Self {
            ignore_dirs: config.ignore_dirs.iter().cloned().collect(),
            extensions: registry.extensions(),
        }
    }

    pub fn with_ignores(mut self, dirs: Vec<String>) -> Self {
        self.ignore_dirs = dirs.into_iter().collect();
        self
    }

    /// Walk `root` (already canonical) and return every supported file, sorted
    /// by relative path. Unreadable directory entries are logged and skipped.
    pub fn scan(&self, root: &Path) -> Vec<ScannedFile> {
        let mut files = Vec::new();

        for entry in WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !self.is_ignored_name(e.file_name()))
        {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    tracing::debug!(error = %err, "walk error");
                    continue;
                }
            };

            if !entry.file_type().is_file() || !self.is_supported(entry.path()) {
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let Some(rel_path) = relative_path(root, entry.path()) else {
                continue;
            };

            files.push(ScannedFile {
                rel_path,
                abs_path: entry.path().to_path_buf(),
                size,
            });
        }

        files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        files
    }

    /// Content fingerprint of every supported file under `root`.
    /// Files that cannot be read get an empty signature so they still show up
    /// in the diff.
    pub fn fingerprint(&self, root: &Path) -> BTreeMap<String, String> {
        self.scan(root)
            .into_iter()
            .map(|f| {
                let hash = std::fs::read(&f.abs_path)
                    .map(|bytes| content_hash(&bytes))
                    .unwrap_or_default();
                (f.rel_path, hash)
            })
            .collect()
    }

    /// True if the path has a supported extension and no ignored component
    /// below `root`.
    pub fn accepts(&self, root: &Path, path: &Path) -> bool {
        if !self.is_supported(path) {
            return false;
        }
        match path.strip_prefix(root) {
            Ok(rel) => !rel
                .components()
                .any(|c| self.is_ignored_name(c.as_os_str())),
            Err(_) => false,
        }
    }

    fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions.iter().any(|x| x == ext))
            .unwrap_or(false)
    }

    fn is_ignored_name(&self, name: &std::ffi::OsStr) -> bool {
        self.ignore_dirs.contains(name.to_string_lossy().as_ref())
    }
}

// ---------------------------------------------------------------------------
// Path + hash helpers
// ---------------------------------------------------------------------------

/// SHA-256 hex digest of file content.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Canonicalize a project root. Used as the cache key and for path relativizing.
pub fn normalize_root(root: &Path) -> Result<PathBuf> {
    root.canonicalize()
        .with_context(|| format!("failed to canonicalize {}", root.display()))
}

/// `path` relative to `root`, `/`-separated. Accepts relative inputs (taken as
/// already root-relative). Returns `None` for paths outside the root or
/// containing `..`.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = if path.is_absolute() {
        path.strip_prefix(root).ok()?
    } else {
        path
    };

    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

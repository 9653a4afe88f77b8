pub mod cache;
pub mod fuzzy;
pub mod keys;
pub mod persist;
pub mod snapshot;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rayon::prelude::*;

use crate::config::IndexConfig;
use crate::grammar::{parse_source, FileExtract, GrammarRegistry, ParseOutcome};
use crate::scanner::{content_hash, normalize_root, relative_path, ScannedFile, SourceScanner};

pub use cache::{IndexCache, SharedIndex};
pub use fuzzy::{Reachability, SymbolMatch};
pub use keys::{KeyMatch, KeyOrigin, OriginKind};
pub use persist::LoadError;
pub use snapshot::{
    CallEdge, ClassEntry, ImportEdge, IndexSnapshot, LiteralKeyRecord, ParseStatus, ReturnShape,
    SignatureEntry, SnapshotStats, SourceFile, Symbol, FORMAT_VERSION,
};

// ---------------------------------------------------------------------------
// IndexStore
// ---------------------------------------------------------------------------

/// Builds, persists and incrementally maintains [`IndexSnapshot`]s.
pub struct IndexStore {
    config: IndexConfig,
    registry: GrammarRegistry,
    scanner: SourceScanner,
}

impl IndexStore {
    pub fn new(config: IndexConfig) -> Self {
        let registry = GrammarRegistry::new();
        let scanner = SourceScanner::new(&config, &registry);
        Self {
            config,
            registry,
            scanner,
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn scanner(&self) -> &SourceScanner {
        &self.scanner
    }

    /// Where the snapshot for `root` (already normalized) is persisted.
    pub fn snapshot_path(&self, root: &Path) -> PathBuf {
        persist::snapshot_path(&self.config.resolved_cache_dir(), root)
    }

    /// Full scan and parse. Files are parsed in parallel; failures are
    /// recorded per file and never abort the build.
    pub fn build(&self, root: &Path) -> Result<IndexSnapshot> {
        let root = normalize_root(root)?;
        if !root.is_dir() {
            bail!("{} is not a directory", root.display());
        }

        let files = self.scanner.scan(&root);
        tracing::info!(root = %root.display(), files = files.len(), "building index");

        let parsed: Vec<(SourceFile, Option<FileExtract>)> =
            files.par_iter().map(|f| self.parse_file(f)).collect();

        let mut snapshot = IndexSnapshot::empty(root);
        for (file, extract) in parsed {
            snapshot.merge_file(file, extract);
        }
        snapshot.normalize();

        let stats = snapshot.stats();
        tracing::info!(
            parsed = stats.parsed,
            syntax_errors = stats.syntax_errors,
            unreadable = stats.unreadable,
            symbols = stats.symbols,
            "index built"
        );
        Ok(snapshot)
    }

    /// Load the persisted snapshot for `root`, or rebuild it. A corrupt,
    /// mismatched or inconsistent cache file is deleted and replaced; a valid
    /// but stale one is brought up to date incrementally.
    pub fn load_or_build(&self, root: &Path) -> Result<IndexSnapshot> {
        let root = normalize_root(root)?;
        let path = self.snapshot_path(&root);

        match persist::load_snapshot(&path, &root) {
            Ok(snapshot) => {
                tracing::debug!(path = %path.display(), "loaded snapshot");
                let refreshed = self.refresh(&snapshot)?;
                if !refreshed.same_content(&snapshot) {
                    self.save_for(&refreshed);
                }
                Ok(refreshed)
            }
            Err(LoadError::Missing(_)) => {
                let snapshot = self.build(&root)?;
                self.save_for(&snapshot);
                Ok(snapshot)
            }
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "discarding unusable snapshot and rebuilding"
                );
                persist::discard_snapshot(&path);
                let snapshot = self.build(&root)?;
                self.save_for(&snapshot);
                Ok(snapshot)
            }
        }
    }

    /// Remove every entry owned by `changed` and `deleted`, then re-parse the
    /// changed files that still exist. Any failure falls back to a full build.
    pub fn incremental_update(
        &self,
        snapshot: &IndexSnapshot,
        changed: &[PathBuf],
        deleted: &[PathBuf],
    ) -> Result<IndexSnapshot> {
        match self.try_incremental(snapshot, changed, deleted) {
            Ok(next) => Ok(next),
            Err(err) => {
                tracing::warn!(error = %err, "incremental update failed, rebuilding");
                self.build(&snapshot.root)
            }
        }
    }

    pub(crate) fn try_incremental(
        &self,
        snapshot: &IndexSnapshot,
        changed: &[PathBuf],
        deleted: &[PathBuf],
    ) -> Result<IndexSnapshot> {
        let root = &snapshot.root;
        let relativize = |p: &PathBuf| -> Result<String> {
            relative_path(root, &resolve_parent(p))
                .with_context(|| format!("{} is outside {}", p.display(), root.display()))
        };

        let mut removed = BTreeSet::new();
        let mut reparse = Vec::new();

        for path in deleted {
            removed.insert(relativize(path)?);
        }
        for path in changed {
            let rel = relativize(path)?;
            let abs = root.join(&rel);
            removed.insert(rel.clone());
            if abs.is_file() && self.scanner.accepts(root, &abs) {
                let size = std::fs::metadata(&abs).map(|m| m.len()).unwrap_or(0);
                reparse.push(ScannedFile {
                    rel_path: rel,
                    abs_path: abs,
                    size,
                });
            }
        }
        // A path both changed and deleted in one batch ends up however disk says.
        reparse.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        reparse.dedup_by(|a, b| a.rel_path == b.rel_path);

        let mut next = snapshot.clone();
        for rel in &removed {
            next.remove_file_entries(rel);
        }

        let parsed: Vec<(SourceFile, Option<FileExtract>)> =
            reparse.par_iter().map(|f| self.parse_file(f)).collect();
        for (file, extract) in parsed {
            next.merge_file(file, extract);
        }
        next.normalize();
        next.built_at = Utc::now();
        next.check_consistency()
            .context("post-update consistency check failed")?;

        tracing::debug!(
            removed = removed.len(),
            reparsed = reparse.len(),
            "incremental update applied"
        );
        Ok(next)
    }

    /// Diff the snapshot's fingerprint against disk and apply the difference.
    pub fn refresh(&self, snapshot: &IndexSnapshot) -> Result<IndexSnapshot> {
        let current = self.scanner.fingerprint(&snapshot.root);

        let changed: Vec<PathBuf> = current
            .iter()
            .filter(|(path, hash)| snapshot.build_fingerprint.get(*path) != Some(*hash))
            .map(|(path, _)| PathBuf::from(path))
            .collect();
        let deleted: Vec<PathBuf> = snapshot
            .build_fingerprint
            .keys()
            .filter(|path| !current.contains_key(*path))
            .map(PathBuf::from)
            .collect();

        if changed.is_empty() && deleted.is_empty() {
            return Ok(snapshot.clone());
        }
        tracing::info!(
            changed = changed.len(),
            deleted = deleted.len(),
            "snapshot is stale, updating"
        );
        self.incremental_update(snapshot, &changed, &deleted)
    }

    /// Persist `snapshot` to an explicit path.
    pub fn save(&self, snapshot: &IndexSnapshot, path: &Path) -> Result<()> {
        persist::save_snapshot(snapshot, path)
    }

    /// Persist to the default location for the snapshot's root. Failure to
    /// write the cache is logged, not returned.
    pub fn save_for(&self, snapshot: &IndexSnapshot) {
        let path = self.snapshot_path(&snapshot.root);
        if let Err(err) = persist::save_snapshot(snapshot, &path) {
            tracing::warn!(path = %path.display(), error = %err, "failed to save snapshot");
        }
    }

    /// Read and parse one file into its record plus extract (when it parsed).
    fn parse_file(&self, file: &ScannedFile) -> (SourceFile, Option<FileExtract>) {
        let record = |hash: String, status: ParseStatus, detail: Option<String>| SourceFile {
            path: file.rel_path.clone(),
            size: file.size,
            content_hash: hash,
            status,
            detail,
        };

        let bytes = match std::fs::read(&file.abs_path) {
            Ok(b) => b,
            Err(err) => {
                tracing::debug!(file = %file.rel_path, error = %err, "unreadable");
                return (
                    record(String::new(), ParseStatus::Unreadable, Some(err.to_string())),
                    None,
                );
            }
        };
        let hash = content_hash(&bytes);

        if bytes.len() as u64 > self.config.max_file_size {
            return (
                record(
                    hash,
                    ParseStatus::Unreadable,
                    Some(format!(
                        "{} bytes exceeds max_file_size {}",
                        bytes.len(),
                        self.config.max_file_size
                    )),
                ),
                None,
            );
        }
        if std::str::from_utf8(&bytes).is_err() {
            return (
                record(
                    hash,
                    ParseStatus::Unreadable,
                    Some("not valid UTF-8".to_string()),
                ),
                None,
            );
        }

        let Some(grammar) = self.registry.for_path(&file.abs_path) else {
            return (
                record(
                    hash,
                    ParseStatus::Unreadable,
                    Some("no grammar for extension".to_string()),
                ),
                None,
            );
        };

        match parse_source(grammar, &bytes) {
            ParseOutcome::Parsed(extract) => (record(hash, ParseStatus::Ok, None), Some(extract)),
            ParseOutcome::SyntaxError { line, message } => {
                tracing::debug!(file = %file.rel_path, line, "syntax error");
                (
                    record(hash, ParseStatus::SyntaxError, Some(message)),
                    None,
                )
            }
        }
    }
}

/// Canonicalize the nearest existing ancestor of `path` and rejoin the rest,
/// so symlinked or `..`-laden paths line up with the canonical root even
/// when the file itself is gone.
fn resolve_parent(path: &Path) -> PathBuf {
    if !path.is_absolute() {
        return path.to_path_buf();
    }
    let mut tail = Vec::new();
    let mut current = path;
    while let (Some(parent), Some(name)) = (current.parent(), current.file_name()) {
        tail.push(name);
        if let Ok(base) = parent.canonicalize() {
            return tail.iter().rev().fold(base, |acc, part| acc.join(part));
        }
        current = parent;
    }
    path.to_path_buf()
}

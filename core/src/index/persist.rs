use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use thiserror::Error;

use super::snapshot::{IndexSnapshot, FORMAT_VERSION};
use crate::scanner::content_hash;

/// Why a persisted snapshot could not be used. Everything except `Missing`
/// means the file on disk is bad and gets replaced.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no snapshot at {0}")]
    Missing(PathBuf),

    #[error("failed to read snapshot: {0}")]
    Read(#[from] std::io::Error),

    #[error("snapshot does not decode: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("snapshot format version {found} is not supported")]
    Version { found: u32 },

    #[error("snapshot belongs to {found}, expected {expected}")]
    RootMismatch { found: PathBuf, expected: PathBuf },

    #[error("snapshot is inconsistent: {0}")]
    Inconsistent(String),
}

/// Distinguishes temp files of concurrent saves within one process.
static SAVE_SEQ: AtomicU64 = AtomicU64::new(0);

/// `<cache_dir>/<first 16 hex chars of sha256(root)>.json`
pub fn snapshot_path(cache_dir: &Path, root: &Path) -> PathBuf {
    let digest = content_hash(root.to_string_lossy().as_bytes());
    cache_dir.join(format!("{}.json", &digest[..16]))
}

/// Read and validate a snapshot for `expected_root`.
pub fn load_snapshot(path: &Path, expected_root: &Path) -> Result<IndexSnapshot, LoadError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(LoadError::Missing(path.to_path_buf()))
        }
        Err(err) => return Err(LoadError::Read(err)),
    };

    let snapshot: IndexSnapshot = serde_json::from_slice(&bytes)?;

    if snapshot.format_version != FORMAT_VERSION {
        return Err(LoadError::Version {
            found: snapshot.format_version,
        });
    }
    if snapshot.root != expected_root {
        return Err(LoadError::RootMismatch {
            found: snapshot.root.clone(),
            expected: expected_root.to_path_buf(),
        });
    }
    snapshot
        .check_consistency()
        .map_err(|e| LoadError::Inconsistent(e.to_string()))?;

    Ok(snapshot)
}

/// Write `snapshot` to a temporary sibling, sync it, then rename over `path`.
/// A crash mid-write leaves either the old file or no file, never a partial one.
pub fn save_snapshot(snapshot: &IndexSnapshot, path: &Path) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("snapshot path {} has no parent", path.display()))?;
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create cache dir {}", dir.display()))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "snapshot.json".to_string());
    let seq = SAVE_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp_path = dir.join(format!(".{file_name}.{}.{seq}.tmp", std::process::id()));

    let write = || -> Result<()> {
        let file = File::create(&tmp_path)
            .with_context(|| format!("failed to create {}", tmp_path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, snapshot).context("failed to serialize snapshot")?;
        writer.flush().context("failed to flush snapshot")?;
        let file = writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("failed to flush snapshot: {}", e.error()))?;
        file.sync_all().context("failed to sync snapshot")?;
        fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename into {}", path.display()))?;
        Ok(())
    };

    if let Err(err) = write() {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }

    tracing::debug!(path = %path.display(), files = snapshot.files.len(), "snapshot saved");
    Ok(())
}

/// Remove a bad snapshot. Missing files are not an error.
pub fn discard_snapshot(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to remove snapshot")
        }
    }
}

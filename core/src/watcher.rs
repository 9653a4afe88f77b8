use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::scanner::SourceScanner;

/// One debounced batch of source changes, absolute paths under the root.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub changed: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }

    /// Split raw event paths by whether they still exist, keeping only files
    /// the scanner would index.
    pub fn classify(root: &Path, scanner: &SourceScanner, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut changed = BTreeSet::new();
        let mut deleted = BTreeSet::new();
        for path in paths {
            if !scanner.accepts(root, &path) {
                continue;
            }
            match path.symlink_metadata() {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => {
                    changed.insert(path);
                }
                Err(_) => {
                    deleted.insert(path);
                }
            }
        }
        Self {
            changed: changed.into_iter().collect(),
            deleted: deleted.into_iter().collect(),
        }
    }
}

/// Watches a project root for file changes with debouncing.
///
/// Uses the platform-native backend (FSEvents on macOS, inotify on Linux, etc.)
/// and coalesces rapid-fire events into one deduplicated path set per batch.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<Vec<PathBuf>>,
}

impl FileWatcher {
    /// `debounce_ms` controls how long to wait after the first event before
    /// flushing the batch. Events arriving within that window are coalesced.
    pub fn new(root: &Path, debounce_ms: u64) -> Result<Self> {
        let (raw_tx, raw_rx) = mpsc::channel::<Event>();
        let (batch_tx, batch_rx) = mpsc::channel::<Vec<PathBuf>>();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                if let Ok(event) = res {
                    let _ = raw_tx.send(event);
                }
            },
            Config::default(),
        )
        .context("failed to create filesystem watcher")?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch {}", root.display()))?;

        let debounce = Duration::from_millis(debounce_ms);

        std::thread::Builder::new()
            .name("sleuth-watch-debounce".into())
            .spawn(move || loop {
                let first = match raw_rx.recv() {
                    Ok(ev) => ev,
                    Err(_) => return, // watcher dropped
                };

                let mut paths = BTreeSet::new();
                paths.extend(first.paths);

                let deadline = Instant::now() + debounce;
                loop {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    match raw_rx.recv_timeout(remaining) {
                        Ok(ev) => paths.extend(ev.paths),
                        Err(mpsc::RecvTimeoutError::Timeout) => break,
                        Err(mpsc::RecvTimeoutError::Disconnected) => {
                            if !paths.is_empty() {
                                let _ = batch_tx.send(paths.into_iter().collect());
                            }
                            return;
                        }
                    }
                }

                if !paths.is_empty() && batch_tx.send(paths.into_iter().collect()).is_err() {
                    return; // receiver dropped
                }
            })
            .context("failed to spawn debounce thread")?;

        Ok(Self {
            _watcher: watcher,
            rx: batch_rx,
        })
    }

    /// Block until a batch arrives (up to `timeout`). Empty on timeout.
    pub fn wait_for_paths(&self, timeout: Duration) -> Vec<PathBuf> {
        self.rx.recv_timeout(timeout).unwrap_or_default()
    }

    /// Next batch, classified against `scanner`. Empty on timeout or when
    /// nothing in the batch is an indexable source file.
    pub fn wait_for_changes(
        &self,
        root: &Path,
        scanner: &SourceScanner,
        timeout: Duration,
    ) -> ChangeSet {
        ChangeSet::classify(root, scanner, self.wait_for_paths(timeout))
    }
}

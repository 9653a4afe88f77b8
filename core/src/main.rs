use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use sleuth_core::config::Config;
use sleuth_core::graph::ImportGraph;
use sleuth_core::index::{IndexSnapshot, IndexStore, SharedIndex};
use sleuth_core::tools::{ToolContext, ToolRegistry};
use sleuth_core::watcher::FileWatcher;

#[derive(Parser)]
#[command(name = "sleuth", about = "Structural index and investigation tools for Python codebases")]
struct Cli {
    /// Config file (defaults to <root>/sleuth.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build or refresh the index and print its stats
    Index { root: PathBuf },

    /// Look up a symbol, falling back to fuzzy matches
    Search {
        root: PathBuf,
        name: String,
        /// Disable fuzzy fallback
        #[arg(long)]
        exact: bool,
        /// Rank candidates by distance from this root-relative file
        #[arg(long)]
        context_file: Option<String>,
    },

    /// List call sites of a function
    Callers { root: PathBuf, name: String },

    /// Report import cycles between project files
    Cycles { root: PathBuf },

    /// Run one investigation tool against the index
    Tool {
        root: PathBuf,
        name: String,
        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },

    /// Keep the persisted index in sync with the working tree
    Watch {
        root: PathBuf,
        /// Debounce window in milliseconds
        #[arg(long, default_value = "500")]
        debounce_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sleuth=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Index { root } => {
            let (_, store, snapshot) = open(&root, cli.config.as_deref())?;
            print_json(&json!({
                "root": snapshot.root,
                "cache": store.snapshot_path(&snapshot.root),
                "built_at": snapshot.built_at,
                "stats": snapshot.stats(),
            }))
        }
        Command::Search {
            root,
            name,
            exact,
            context_file,
        } => {
            let (config, _, snapshot) = open(&root, cli.config.as_deref())?;
            let matches = snapshot.search_symbol(
                &name,
                !exact,
                context_file.as_deref(),
                config.index.fuzzy_floor,
            );
            print_json(&serde_json::to_value(matches)?)
        }
        Command::Callers { root, name } => {
            let (_, _, snapshot) = open(&root, cli.config.as_deref())?;
            print_json(&serde_json::to_value(snapshot.callers(&name))?)
        }
        Command::Cycles { root } => {
            let (_, _, snapshot) = open(&root, cli.config.as_deref())?;
            let cycles = ImportGraph::from_snapshot(&snapshot).cycles();
            print_json(&serde_json::to_value(cycles)?)
        }
        Command::Tool { root, name, args } => {
            let args: Value =
                serde_json::from_str(&args).context("--args must be a JSON object")?;
            let (config, _, snapshot) = open(&root, cli.config.as_deref())?;
            let registry = ToolRegistry::with_defaults();
            let ctx = ToolContext::new(Arc::new(snapshot), Arc::new(config));
            let result = registry.execute(&ctx, &name, args).await;
            print_json(&serde_json::to_value(result)?)
        }
        Command::Watch { root, debounce_ms } => {
            let (_, store, snapshot) = open(&root, cli.config.as_deref())?;
            watch(store, snapshot, debounce_ms).await
        }
    }
}

fn open(root: &Path, config_path: Option<&Path>) -> Result<(Config, IndexStore, IndexSnapshot)> {
    let config = match config_path {
        Some(path) => Config::load(path)?,
        None => Config::discover(root)?,
    };
    let store = IndexStore::new(config.index.clone());
    tracing::info!(root = %root.display(), "opening index");
    let snapshot = store
        .load_or_build(root)
        .with_context(|| format!("failed to index {}", root.display()))?;
    Ok((config, store, snapshot))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn watch(store: IndexStore, snapshot: IndexSnapshot, debounce_ms: u64) -> Result<()> {
    let root = snapshot.root.clone();
    let shared = SharedIndex::new(snapshot);
    let cancel = CancellationToken::new();

    let worker = {
        let cancel = cancel.clone();
        let shared = shared.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let watcher = FileWatcher::new(&root, debounce_ms)?;
            tracing::info!(root = %root.display(), "file watcher started");
            while !cancel.is_cancelled() {
                let changes = watcher.wait_for_changes(&root, store.scanner(), Duration::from_secs(1));
                if changes.is_empty() {
                    continue;
                }
                let current = shared.snapshot();
                match store.incremental_update(&current, &changes.changed, &changes.deleted) {
                    Ok(next) => {
                        tracing::info!(
                            changed = changes.changed.len(),
                            deleted = changes.deleted.len(),
                            "index updated"
                        );
                        store.save_for(&next);
                        shared.install(next);
                    }
                    Err(e) => tracing::warn!(error = %e, "index update failed"),
                }
            }
            Ok(())
        })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("stopping file watcher");
    cancel.cancel();
    worker.await.context("watcher task failed")?
}

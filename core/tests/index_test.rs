use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use sleuth_core::config::IndexConfig;
use sleuth_core::index::persist::load_snapshot;
use sleuth_core::index::{IndexCache, IndexStore, ParseStatus};

/// Project dir plus a separate cache dir so snapshots never land in the tree.
fn setup() -> (TempDir, TempDir, IndexStore) {
    let project = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let config = IndexConfig {
        cache_dir: Some(cache.path().to_path_buf()),
        ..IndexConfig::default()
    };
    (project, cache, IndexStore::new(config))
}

fn write_file(dir: &Path, rel: &str, content: &str) -> PathBuf {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

fn seed_project(dir: &Path) {
    write_file(
        dir,
        "app/models.py",
        "class User:\n    def __init__(self, name):\n        self.name = name\n\n    def as_dict(self):\n        return {\"name\": self.name}\n",
    );
    write_file(
        dir,
        "app/service.py",
        "from app.models import User\n\n\ndef load_user(name):\n    return User(name)\n",
    );
    write_file(dir, "main.py", "from app.service import load_user\n\nload_user(\"ada\")\n");
}

// ---------------------------------------------------------------------------
// 1. Full build with broken files
// ---------------------------------------------------------------------------
#[test]
fn test_build_records_syntax_errors_without_failing() {
    let (project, _cache, store) = setup();
    seed_project(project.path());
    write_file(project.path(), "broken_a.py", "def broken(:\n    pass\n");
    write_file(project.path(), "pkg/broken_b.py", "class X(\n");

    let snapshot = store.build(project.path()).unwrap();
    let stats = snapshot.stats();
    assert_eq!(stats.files, 5);
    assert_eq!(stats.parsed, 3);
    assert_eq!(stats.syntax_errors, 2);

    for file in snapshot.files_with_status(ParseStatus::SyntaxError) {
        assert!(file.path.contains("broken"), "{}", file.path);
        assert!(file.detail.is_some());
    }
    // Symbols only come from files that parsed.
    for sym in snapshot.symbol_table.values().flatten() {
        assert!(!sym.file.contains("broken"), "{sym:?}");
    }
    assert!(snapshot.symbol_table.contains_key("load_user"));
    assert_eq!(snapshot.class_methods("User")[0].methods, vec!["__init__", "as_dict"]);
}

#[test]
fn test_non_utf8_and_oversize_files_are_unreadable() {
    let project = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let store = IndexStore::new(IndexConfig {
        cache_dir: Some(cache.path().to_path_buf()),
        max_file_size: 64,
        ..IndexConfig::default()
    });
    write_file(project.path(), "ok.py", "x = 1\n");
    fs::write(project.path().join("latin1.py"), [0x63u8, 0x61, 0x66, 0xe9, 0x0a]).unwrap();
    write_file(project.path(), "huge.py", &"y = 2\n".repeat(50));

    let snapshot = store.build(project.path()).unwrap();
    assert_eq!(snapshot.files["ok.py"].status, ParseStatus::Ok);
    assert_eq!(snapshot.files["latin1.py"].status, ParseStatus::Unreadable);
    assert_eq!(snapshot.files["huge.py"].status, ParseStatus::Unreadable);
    snapshot.check_consistency().unwrap();
}

// ---------------------------------------------------------------------------
// 2. Determinism
// ---------------------------------------------------------------------------
#[test]
fn test_build_is_deterministic() {
    let (project, _cache, store) = setup();
    seed_project(project.path());

    let first = store.build(project.path()).unwrap();
    let mut second = store.build(project.path()).unwrap();
    second.built_at = first.built_at;

    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert!(first.same_content(&second));
}

// ---------------------------------------------------------------------------
// 3. Persistence and self-healing
// ---------------------------------------------------------------------------
#[test]
fn test_load_or_build_persists_snapshot() {
    let (project, _cache, store) = setup();
    seed_project(project.path());

    let built = store.load_or_build(project.path()).unwrap();
    let path = store.snapshot_path(&built.root);
    assert!(path.is_file());

    let loaded = load_snapshot(&path, &built.root).unwrap();
    assert!(loaded.same_content(&built));
}

#[test]
fn test_truncated_cache_is_replaced() {
    let (project, _cache, store) = setup();
    seed_project(project.path());

    let original = store.load_or_build(project.path()).unwrap();
    let path = store.snapshot_path(&original.root);
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
    assert!(load_snapshot(&path, &original.root).is_err());

    let healed = store.load_or_build(project.path()).unwrap();
    let fresh = store.build(project.path()).unwrap();
    assert!(healed.same_content(&fresh));

    // The corrupt file was overwritten with a valid one.
    let reloaded = load_snapshot(&path, &original.root).unwrap();
    assert!(reloaded.same_content(&fresh));
}

#[test]
fn test_snapshot_for_other_root_is_rejected() {
    let (project, _cache, store) = setup();
    seed_project(project.path());
    let other = TempDir::new().unwrap();
    write_file(other.path(), "x.py", "x = 1\n");

    let snapshot = store.load_or_build(project.path()).unwrap();
    let other_root = other.path().canonicalize().unwrap();
    store
        .save(&snapshot, &store.snapshot_path(&other_root))
        .unwrap();

    let rebuilt = store.load_or_build(other.path()).unwrap();
    assert_eq!(rebuilt.root, other_root);
    assert!(rebuilt.files.contains_key("x.py"));
}

#[test]
fn test_stale_cache_is_refreshed_on_load() {
    let (project, _cache, store) = setup();
    seed_project(project.path());
    store.load_or_build(project.path()).unwrap();

    write_file(project.path(), "app/extra.py", "def helper():\n    pass\n");
    let refreshed = store.load_or_build(project.path()).unwrap();
    assert!(refreshed.symbol_table.contains_key("helper"));
    assert!(refreshed.same_content(&store.build(project.path()).unwrap()));
}

// ---------------------------------------------------------------------------
// 4. Incremental updates match a full build
// ---------------------------------------------------------------------------
#[test]
fn test_incremental_add_file() {
    let (project, _cache, store) = setup();
    seed_project(project.path());
    let before = store.build(project.path()).unwrap();

    let added = write_file(project.path(), "app/utils.py", "def slugify(text):\n    return text.lower()\n");
    let after = store.incremental_update(&before, &[added], &[]).unwrap();

    assert!(after.symbol_table.contains_key("slugify"));
    assert!(after.same_content(&store.build(project.path()).unwrap()));
}

#[test]
fn test_incremental_remove_file() {
    let (project, _cache, store) = setup();
    seed_project(project.path());
    let before = store.build(project.path()).unwrap();

    let removed = project.path().join("app/service.py");
    fs::remove_file(&removed).unwrap();
    let after = store.incremental_update(&before, &[], &[removed]).unwrap();

    assert!(!after.symbol_table.contains_key("load_user"));
    assert!(!after.files.contains_key("app/service.py"));
    assert!(after.same_content(&store.build(project.path()).unwrap()));
}

#[test]
fn test_incremental_rename_file() {
    let (project, _cache, store) = setup();
    seed_project(project.path());
    let before = store.build(project.path()).unwrap();

    let old = project.path().join("app/service.py");
    let new = project.path().join("app/services.py");
    fs::rename(&old, &new).unwrap();
    let after = store.incremental_update(&before, &[new], &[old]).unwrap();

    assert_eq!(after.symbol_table["load_user"][0].file, "app/services.py");
    assert!(after.same_content(&store.build(project.path()).unwrap()));
}

#[test]
fn test_incremental_rename_symbol() {
    let (project, _cache, store) = setup();
    seed_project(project.path());
    let before = store.build(project.path()).unwrap();

    let service = write_file(
        &before.root,
        "app/service.py",
        "from app.models import User\n\n\ndef fetch_user(name):\n    return User(name)\n",
    );
    let after = store.incremental_update(&before, &[service], &[]).unwrap();

    assert!(!after.symbol_table.contains_key("load_user"));
    assert_eq!(after.symbol_table["fetch_user"][0].file, "app/service.py");
    assert!(after.same_content(&store.build(project.path()).unwrap()));
}

#[test]
fn test_incremental_import_change() {
    let (project, _cache, store) = setup();
    seed_project(project.path());
    let before = store.build(project.path()).unwrap();

    let main = write_file(
        project.path(),
        "main.py",
        "import os\nfrom app.models import User\n\nUser(os.getcwd())\n",
    );
    let after = store.incremental_update(&before, &[main], &[]).unwrap();

    let modules: Vec<&str> = after.import_graph["main.py"]
        .iter()
        .map(|e| e.module.as_str())
        .collect();
    assert_eq!(modules, vec!["os", "app.models"]);
    assert!(after.callers("load_user").iter().all(|c| c.file != "main.py"));
    assert!(after.same_content(&store.build(project.path()).unwrap()));
}

#[test]
fn test_incremental_file_becomes_broken() {
    let (project, _cache, store) = setup();
    seed_project(project.path());
    let before = store.build(project.path()).unwrap();

    let models = write_file(project.path(), "app/models.py", "class User(\n");
    let after = store.incremental_update(&before, &[models], &[]).unwrap();

    assert_eq!(after.files["app/models.py"].status, ParseStatus::SyntaxError);
    assert!(!after.class_table.contains_key("User"));
    assert!(after.same_content(&store.build(project.path()).unwrap()));
}

// ---------------------------------------------------------------------------
// 5. Cache of shared handles
// ---------------------------------------------------------------------------
#[test]
fn test_index_cache_reuses_handles_per_root() {
    let (project, _cache, store) = setup();
    seed_project(project.path());
    let mut cache = IndexCache::new(store);

    let first = cache.get_or_load(project.path()).unwrap();
    let second = cache.get_or_load(project.path()).unwrap();
    assert_eq!(cache.len(), 1);
    assert!(std::sync::Arc::ptr_eq(&first.snapshot(), &second.snapshot()));

    write_file(project.path(), "late.py", "def late():\n    pass\n");
    let pinned = first.snapshot();
    cache.refresh(project.path()).unwrap();
    assert!(second.snapshot().symbol_table.contains_key("late"));
    // Readers that pinned the old snapshot keep it.
    assert!(!pinned.symbol_table.contains_key("late"));

    assert!(cache.evict(project.path()));
    assert!(cache.is_empty());
}

use std::fs;
use std::path::Path;

use tempfile::TempDir;
use sleuth_core::config::IndexConfig;
use sleuth_core::graph::{resolve_module, search_module, ImportGraph, ModuleMatchKind};
use sleuth_core::index::{IndexSnapshot, IndexStore};

fn write_file(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn build(dir: &TempDir) -> IndexSnapshot {
    let cache = TempDir::new().unwrap();
    let store = IndexStore::new(IndexConfig {
        cache_dir: Some(cache.path().to_path_buf()),
        ..IndexConfig::default()
    });
    store.build(dir.path()).unwrap()
}

// ---------------------------------------------------------------------------
// 1. Module resolution
// ---------------------------------------------------------------------------
#[test]
fn test_resolve_absolute_relative_and_external() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "app/__init__.py", "");
    write_file(dir.path(), "app/models.py", "class User:\n    pass\n");
    write_file(dir.path(), "app/api/views.py", "from ..models import User\n");
    write_file(dir.path(), "scripts/run.py", "import helper\n");
    write_file(dir.path(), "scripts/helper.py", "X = 1\n");

    let snapshot = build(&dir);
    assert_eq!(
        resolve_module(&snapshot, "main.py", "app.models").as_deref(),
        Some("app/models.py")
    );
    assert_eq!(
        resolve_module(&snapshot, "main.py", "app").as_deref(),
        Some("app/__init__.py")
    );
    assert_eq!(
        resolve_module(&snapshot, "app/api/views.py", "..models").as_deref(),
        Some("app/models.py")
    );
    assert_eq!(
        resolve_module(&snapshot, "scripts/run.py", "helper").as_deref(),
        Some("scripts/helper.py")
    );
    assert_eq!(resolve_module(&snapshot, "main.py", "os"), None);
    assert_eq!(resolve_module(&snapshot, "a.py", "...too_far"), None);
}

// ---------------------------------------------------------------------------
// 2. Import cycles
// ---------------------------------------------------------------------------
#[test]
fn test_import_cycles_detected() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "a.py", "import b\n\n\ndef thing():\n    pass\n");
    write_file(dir.path(), "b.py", "from a import thing\nimport os\n");
    write_file(dir.path(), "c.py", "import a\n");

    let graph = ImportGraph::from_snapshot(&build(&dir));
    let cycles = graph.cycles();
    assert_eq!(cycles.len(), 1, "{cycles:?}");
    assert_eq!(cycles[0].files, vec!["a.py", "b.py"]);
    assert!(!cycles[0].conditional);

    assert_eq!(graph.imports_of("b.py"), vec!["a.py"]);
    assert_eq!(graph.importers_of("a.py"), vec!["b.py", "c.py"]);
}

#[test]
fn test_conditional_cycle_is_flagged() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "c.py", "try:\n    import d\nexcept ImportError:\n    d = None\n");
    write_file(dir.path(), "d.py", "import c\n");

    let cycles = ImportGraph::from_snapshot(&build(&dir)).cycles();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].files, vec!["c.py", "d.py"]);
    assert!(cycles[0].conditional);
}

#[test]
fn test_relative_package_cycle() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "pkg/__init__.py", "");
    write_file(dir.path(), "pkg/x.py", "from . import y\n");
    write_file(dir.path(), "pkg/y.py", "from .x import f\n");

    let cycles = ImportGraph::from_snapshot(&build(&dir)).cycles();
    assert_eq!(cycles.len(), 1, "{cycles:?}");
    assert_eq!(cycles[0].files, vec!["pkg/x.py", "pkg/y.py"]);
}

#[test]
fn test_overlapping_cycles_reported_once_per_component() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "a.py", "import b\nimport c\n");
    write_file(dir.path(), "b.py", "import c\n");
    write_file(dir.path(), "c.py", "import a\n");

    let graph = ImportGraph::from_snapshot(&build(&dir));
    let cycles = graph.cycles();
    // a -> b -> c -> a is found; the shorter a <-> c is not enumerated.
    assert_eq!(cycles.len(), 1, "{cycles:?}");
    assert_eq!(cycles[0].files, vec!["a.py", "b.py", "c.py"]);
    let files = &cycles[0].files;
    for (i, from) in files.iter().enumerate() {
        let to = files[(i + 1) % files.len()].as_str();
        assert!(graph.imports_of(from).contains(&to), "{from} -> {to}");
    }
}

#[test]
fn test_acyclic_project_has_no_cycles() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "a.py", "import b\n");
    write_file(dir.path(), "b.py", "import c\n");
    write_file(dir.path(), "c.py", "import json\n");

    assert!(ImportGraph::from_snapshot(&build(&dir)).cycles().is_empty());
}

// ---------------------------------------------------------------------------
// 3. Module search
// ---------------------------------------------------------------------------
#[test]
fn test_module_search_explains_moves() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "shared/utils.py", "def slug():\n    pass\n");
    write_file(dir.path(), "api/v2/endpoints/users.py", "def list_users():\n    pass\n");

    let snapshot = build(&dir);

    let exact = search_module(&snapshot, "shared.utils", true, 0.6);
    assert_eq!(exact[0].kind, ModuleMatchKind::Exact);
    assert_eq!(exact[0].file, "shared/utils.py");

    let moved = search_module(&snapshot, "utils", true, 0.6);
    assert_eq!(moved[0].kind, ModuleMatchKind::PrefixAdded);
    assert_eq!(moved[0].missing, vec!["shared"]);

    let skipped = search_module(&snapshot, "api.endpoints.users", true, 0.6);
    assert_eq!(skipped[0].kind, ModuleMatchKind::IntermediateMissing);
    assert_eq!(skipped[0].missing, vec!["v2"]);

    let typo = search_module(&snapshot, "utilz", true, 0.6);
    assert_eq!(typo[0].kind, ModuleMatchKind::Fuzzy);
    assert_eq!(typo[0].module, "shared.utils");
    assert!(search_module(&snapshot, "utilz", false, 0.6).is_empty());
}

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use sleuth_core::config::{Config, IndexConfig};
use sleuth_core::error::ErrorKind;
use sleuth_core::index::IndexStore;
use sleuth_core::investigation::Phase;
use sleuth_core::tools::{ToolContext, ToolRegistry, ToolResult};

fn write_file(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

/// Small project: `foo.py` defines `load_data`, `bar.py` calls a typo.
fn setup() -> (TempDir, ToolContext) {
    let dir = TempDir::new().unwrap();
    write_file(
        dir.path(),
        "foo.py",
        "def load_data(path):\n    with open(path) as f:\n        return f.read()\n",
    );
    write_file(
        dir.path(),
        "bar.py",
        "from foo import load_data\n\n\ndef main():\n    return load_dat(\"x.csv\")\n",
    );

    let cache = TempDir::new().unwrap();
    let config = Config {
        index: IndexConfig {
            cache_dir: Some(cache.path().to_path_buf()),
            ..IndexConfig::default()
        },
        ..Config::default()
    };
    let snapshot = IndexStore::new(config.index.clone())
        .build(dir.path())
        .unwrap();
    let ctx = ToolContext::new(Arc::new(snapshot), Arc::new(config));
    (dir, ctx)
}

fn warnings(result: &ToolResult) -> &[String] {
    match result {
        ToolResult::Success { warnings, .. } => warnings,
        ToolResult::Failure { kind, message } => panic!("tool failed: {kind} {message}"),
    }
}

// ---------------------------------------------------------------------------
// 1. Dispatch and validation
// ---------------------------------------------------------------------------
#[tokio::test]
async fn test_unknown_tool_lists_available_names() {
    let (_dir, ctx) = setup();
    let registry = ToolRegistry::with_defaults();

    let result = registry.execute(&ctx, "teleport", json!({})).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::Validation));
    let ToolResult::Failure { message, .. } = result else {
        unreachable!()
    };
    for name in ["search_symbol", "get_callers", "read_file", "grep", "complete_investigation"] {
        assert!(message.contains(name), "{name} missing from {message}");
    }
}

#[tokio::test]
async fn test_argument_validation() {
    let (_dir, ctx) = setup();
    let registry = ToolRegistry::with_defaults();

    let missing = registry.execute(&ctx, "search_symbol", json!({})).await;
    assert_eq!(missing.error_kind(), Some(ErrorKind::Validation));

    let wrong_type = registry.execute(&ctx, "search_symbol", json!({"name": 5})).await;
    assert_eq!(wrong_type.error_kind(), Some(ErrorKind::Validation));

    let not_object = registry.execute(&ctx, "grep", json!("load")).await;
    assert_eq!(not_object.error_kind(), Some(ErrorKind::Validation));
}

#[tokio::test]
async fn test_camel_case_names_are_accepted() {
    let (_dir, ctx) = setup();
    let registry = ToolRegistry::with_defaults();

    let result = registry
        .execute(&ctx, "searchSymbol", json!({"name": "load_data"}))
        .await;
    assert!(result.is_success());
}

#[test]
fn test_registry_exports_schemas() {
    let registry = ToolRegistry::with_defaults();
    assert_eq!(registry.names().len(), 9);
    let schemas = registry.schemas();
    assert_eq!(schemas.len(), 9);
    assert!(schemas.iter().all(|s| s["type"] == "function"));
}

// ---------------------------------------------------------------------------
// 2. Index tools
// ---------------------------------------------------------------------------
#[tokio::test]
async fn test_search_symbol_suggests_typo_fix() {
    let (_dir, ctx) = setup();
    let registry = ToolRegistry::with_defaults();

    let result = registry
        .execute(&ctx, "search_symbol", json!({"name": "load_dat", "context_file": "bar.py"}))
        .await;
    let data = result.data().unwrap();
    assert_eq!(data["exact"], false);
    assert_eq!(data["matches"][0]["name"], "load_data");
    assert_eq!(data["matches"][0]["file"], "foo.py");

    let none = registry
        .execute(&ctx, "search_symbol", json!({"name": "zzzzzz"}))
        .await;
    assert_eq!(none.error_kind(), Some(ErrorKind::NotFound));
}

#[tokio::test]
async fn test_get_callers_reports_call_sites() {
    let (_dir, ctx) = setup();
    let registry = ToolRegistry::with_defaults();

    let result = registry
        .execute(&ctx, "get_callers", json!({"name": "load_dat"}))
        .await;
    let data = result.data().unwrap();
    assert_eq!(data["callers"][0]["file"], "bar.py");
    assert_eq!(data["callers"][0]["caller"], "main");

    let nobody = registry
        .execute(&ctx, "get_callers", json!({"name": "load_data"}))
        .await;
    assert_eq!(warnings(&nobody).len(), 1);
}

// ---------------------------------------------------------------------------
// 3. File tools
// ---------------------------------------------------------------------------
#[tokio::test]
async fn test_read_file_clamps_range_with_warnings() {
    let (_dir, ctx) = setup();
    let registry = ToolRegistry::with_defaults();

    let result = registry
        .execute(
            &ctx,
            "read_file",
            json!({"path": "foo.py", "start_line": 0, "end_line": 99}),
        )
        .await;
    assert_eq!(warnings(&result).len(), 2);
    let data = result.data().unwrap();
    assert_eq!(data["start_line"], 1);
    assert_eq!(data["end_line"], 3);
    assert!(data["content"].as_str().unwrap().starts_with("   1: def load_data"));
}

#[tokio::test]
async fn test_read_file_rejects_paths_outside_root() {
    let (_dir, ctx) = setup();
    let registry = ToolRegistry::with_defaults();
    let outside = TempDir::new().unwrap();
    write_file(outside.path(), "secret.py", "TOKEN = 1\n");
    let path = outside.path().join("secret.py");

    let result = registry
        .execute(&ctx, "read_file", json!({"path": path.to_string_lossy()}))
        .await;
    assert_eq!(result.error_kind(), Some(ErrorKind::Permission));

    let missing = registry
        .execute(&ctx, "read_file", json!({"path": "nope.py"}))
        .await;
    assert_eq!(missing.error_kind(), Some(ErrorKind::NotFound));
}

#[tokio::test]
async fn test_grep_invalid_regex_falls_back_to_literal() {
    let (_dir, ctx) = setup();
    let registry = ToolRegistry::with_defaults();

    let result = registry
        .execute(&ctx, "grep", json!({"pattern": "load_dat(", "use_regex": true}))
        .await;
    assert_eq!(warnings(&result).len(), 1);
    let data = result.data().unwrap();
    assert_eq!(data["mode"], "literal");
    let matches = data["matches"].as_array().unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0]["file"], "bar.py");
    assert_eq!(matches[0]["line"], 5);
}

#[tokio::test]
async fn test_grep_regex_scoped_to_path() {
    let (dir, ctx) = setup();
    write_file(dir.path(), "sub/extra.py", "load_data = None\n");
    let registry = ToolRegistry::with_defaults();

    let everywhere = registry
        .execute(&ctx, "grep", json!({"pattern": r"load_data\b", "use_regex": true}))
        .await;
    let scoped = registry
        .execute(&ctx, "grep", json!({"pattern": r"load_data\b", "use_regex": true, "path": "sub"}))
        .await;

    let count = |r: &ToolResult| r.data().unwrap()["matches"].as_array().unwrap().len();
    assert_eq!(count(&everywhere), 3);
    assert_eq!(count(&scoped), 1);
}

// ---------------------------------------------------------------------------
// 4. Control tools
// ---------------------------------------------------------------------------
#[tokio::test]
async fn test_set_phase_requires_reason() {
    let (_dir, ctx) = setup();
    let registry = ToolRegistry::with_defaults();

    let short = registry
        .execute(&ctx, "set_phase", json!({"phase": "ANALYZE", "reason": "ok"}))
        .await;
    assert_eq!(short.error_kind(), Some(ErrorKind::Validation));

    let bad = registry
        .execute(&ctx, "set_phase", json!({"phase": "DONE", "reason": "because reasons"}))
        .await;
    assert_eq!(bad.error_kind(), Some(ErrorKind::Validation));

    let ok = registry
        .execute(
            &ctx,
            "set_phase",
            json!({"phase": "analyze", "reason": "found the missing definition"}),
        )
        .await;
    assert_eq!(ok.data().unwrap()["phase"], "ANALYZE");
    assert_eq!(ok.data().unwrap()["previous"], "EXPLORE");
}

#[tokio::test]
async fn test_complete_investigation_validates_report() {
    let (_dir, ctx) = setup();
    let ctx = ctx.with_phase(Phase::Analyze);
    let registry = ToolRegistry::with_defaults();

    let invalid = registry
        .execute(&ctx, "complete_investigation", json!({"report": {"summary": "short"}}))
        .await;
    assert_eq!(invalid.error_kind(), Some(ErrorKind::Validation));

    let report = json!({
        "summary": "bar.py calls load_dat, which does not exist",
        "relevant_locations": [
            {"file_path": "bar.py", "line": 5, "symbol": "main", "reasoning": "typo"}
        ],
        "root_cause": "misspelled function name",
        "suggested_fix": "call load_data instead",
        "confidence": 0.9
    });
    let accepted = registry
        .execute(&ctx, "complete_investigation", json!({"report": report}))
        .await;
    assert!(warnings(&accepted).is_empty());
    assert_eq!(accepted.data().unwrap()["report"]["confidence"], 0.9);
}

#[tokio::test]
async fn test_phase_mismatch_is_advisory() {
    let (_dir, ctx) = setup();
    let registry = ToolRegistry::with_defaults();

    let result = registry.execute(&ctx, "find_import_cycles", json!({})).await;
    let warnings = warnings(&result);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("ANALYZE"), "{warnings:?}");
}

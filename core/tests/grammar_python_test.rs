use sleuth_core::grammar::python::PythonGrammar;
use sleuth_core::grammar::{
    parse_source, FileExtract, GrammarRegistry, KeyUsage, ParamKind, ParseOutcome, SymbolKind,
};

const PY_SOURCE: &str = r#"import os
from pathlib import Path
from . import helpers
from .models import User as U, Group

try:
    import ujson as json
except ImportError:
    import json

DEFAULT_LEVEL = "info"
a, b = 1, 2


class FileProcessor(Base, metaclass=Meta):
    def __init__(self, base_dir: str):
        self.base_dir = Path(base_dir)

    def process(self, filename: str, *, strict=False) -> bool:
        path = self.base_dir / filename
        return path.exists()


def read_config(path: str, retries=3, *args, **kwargs) -> dict:
    with open(path) as f:
        data = json.load(f)
    level = data.get("log_level")
    return {"logging": {"level": level, "file": data["log_file"]}, "debug": False}


def lazy():
    import yaml
    return yaml


def main():
    processor = FileProcessor("/tmp")
    processor.process("test.txt")
"#;

fn extract(source: &str) -> FileExtract {
    match parse_source(&PythonGrammar, source.as_bytes()) {
        ParseOutcome::Parsed(extract) => extract,
        other => panic!("expected a clean parse, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// 1. Declarations
// ---------------------------------------------------------------------------
#[test]
fn test_python_extract_symbols() {
    let out = extract(PY_SOURCE);
    let find = |name: &str| {
        out.symbols
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("{name} not found in {:?}", out.symbols))
    };

    let class = find("FileProcessor");
    assert_eq!(class.kind, SymbolKind::Class);
    assert_eq!(class.bases, vec!["Base".to_string()]);
    assert_eq!(class.start_line, 15);

    let init = find("__init__");
    assert_eq!(init.kind, SymbolKind::Method);
    assert_eq!(init.parent.as_deref(), Some("FileProcessor"));

    assert_eq!(find("read_config").kind, SymbolKind::Function);
    assert_eq!(find("main").kind, SymbolKind::Function);
    assert_eq!(find("DEFAULT_LEVEL").kind, SymbolKind::Variable);
    assert_eq!(find("a").kind, SymbolKind::Variable);
    assert_eq!(find("b").kind, SymbolKind::Variable);

    // Attribute assignments inside methods are not module variables.
    assert!(!out.symbols.iter().any(|s| s.name == "base_dir"));
}

// ---------------------------------------------------------------------------
// 2. Signatures
// ---------------------------------------------------------------------------
#[test]
fn test_python_signature_extraction() {
    let out = extract(PY_SOURCE);

    let process = out.symbols.iter().find(|s| s.name == "process").unwrap();
    let sig = process.signature.as_ref().unwrap();
    assert_eq!(sig.text, "def process(self, filename: str, *, strict=False) -> bool:");
    assert_eq!(sig.min_arity, 1);
    assert_eq!(sig.max_arity, Some(1));
    let strict = sig.params.iter().find(|p| p.name == "strict").unwrap();
    assert_eq!(strict.kind, ParamKind::KeywordOnly);
    assert_eq!(strict.default.as_deref(), Some("False"));

    let read_config = out.symbols.iter().find(|s| s.name == "read_config").unwrap();
    let sig = read_config.signature.as_ref().unwrap();
    assert!(sig.text.contains("path: str"), "got {:?}", sig.text);
    assert!(!sig.text.contains("json.load"), "body leaked into {:?}", sig.text);
    assert_eq!(sig.min_arity, 1);
    assert_eq!(sig.max_arity, None);
    let kinds: Vec<ParamKind> = sig.params.iter().map(|p| p.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ParamKind::Positional,
            ParamKind::Positional,
            ParamKind::VarArgs,
            ParamKind::VarKeyword
        ]
    );
}

// ---------------------------------------------------------------------------
// 3. Imports
// ---------------------------------------------------------------------------
#[test]
fn test_python_imports_and_conditionals() {
    let out = extract(PY_SOURCE);
    let find = |module: &str, alias: Option<&str>| {
        out.imports
            .iter()
            .find(|i| i.module == module && i.alias.as_deref() == alias)
            .unwrap_or_else(|| panic!("import {module} not found in {:?}", out.imports))
    };

    assert!(!find("os", None).conditional);

    let pathlib = find("pathlib", None);
    assert_eq!(pathlib.names.len(), 1);
    assert_eq!(pathlib.names[0].name, "Path");

    let relative = find(".", None);
    assert_eq!(relative.names[0].name, "helpers");

    let models = find(".models", None);
    assert_eq!(models.names[0].name, "User");
    assert_eq!(models.names[0].alias.as_deref(), Some("U"));
    assert_eq!(models.names[1].name, "Group");

    assert!(find("ujson", Some("json")).conditional);
    assert!(find("json", None).conditional);
    assert!(find("yaml", None).conditional, "function-local import is deferred");
}

// ---------------------------------------------------------------------------
// 4. Calls
// ---------------------------------------------------------------------------
#[test]
fn test_python_extract_calls() {
    let out = extract(PY_SOURCE);
    let has = |caller: &str, key: &str| {
        out.calls
            .iter()
            .any(|c| c.caller.as_deref() == Some(caller) && c.key == key)
    };

    assert!(has("main", "FileProcessor"), "got {:?}", out.calls);
    assert!(has("main", "process"));
    assert!(has("read_config", "open"));
    assert!(has("read_config", "load"));

    let load = out.calls.iter().find(|c| c.key == "load").unwrap();
    assert_eq!(load.callee, "json.load");
}

// ---------------------------------------------------------------------------
// 5. Literal keys and returned dict shapes
// ---------------------------------------------------------------------------
#[test]
fn test_python_literal_keys() {
    let out = extract(PY_SOURCE);
    let usage_of = |key: &str| {
        out.keys
            .iter()
            .find(|k| k.key == key)
            .map(|k| k.usage)
            .unwrap_or_else(|| panic!("key {key} not found in {:?}", out.keys))
    };

    assert_eq!(usage_of("log_level"), KeyUsage::Access);
    assert_eq!(usage_of("log_file"), KeyUsage::Access);
    assert_eq!(usage_of("logging"), KeyUsage::Construction);
    assert_eq!(usage_of("level"), KeyUsage::Construction);
    assert_eq!(usage_of("debug"), KeyUsage::Construction);
}

#[test]
fn test_python_return_shape() {
    let out = extract(PY_SOURCE);
    let shape = out
        .return_shapes
        .iter()
        .find(|r| r.function == "read_config")
        .expect("read_config return shape");

    assert_eq!(shape.shape.keys, vec!["logging".to_string(), "debug".to_string()]);
    let logging = &shape.shape.nested["logging"];
    assert_eq!(logging.keys, vec!["level".to_string(), "file".to_string()]);
}

#[test]
fn test_python_method_return_shape_is_qualified() {
    let src = "class Settings:\n    def as_dict(self):\n        return {\"name\": self.name}\n";
    let out = extract(src);
    assert_eq!(out.return_shapes.len(), 1);
    assert_eq!(out.return_shapes[0].function, "Settings.as_dict");
}

// ---------------------------------------------------------------------------
// 6. Failure handling
// ---------------------------------------------------------------------------
#[test]
fn test_python_syntax_error_is_reported() {
    let outcome = parse_source(&PythonGrammar, b"def ok():\n    pass\n\ndef broken(:\n    pass\n");
    match outcome {
        ParseOutcome::SyntaxError { line, .. } => assert!(line > 0, "line {line}"),
        ParseOutcome::Parsed(_) => panic!("broken source parsed cleanly"),
    }
}

#[test]
fn test_python_registry() {
    let registry = GrammarRegistry::new();
    assert!(registry.for_extension("py").is_some());
    assert!(registry.for_extension("pyi").is_some());
    assert!(registry.for_extension("rs").is_none());
}

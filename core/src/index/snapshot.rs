use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::grammar::{DictShape, FileExtract, ImportedName, KeyUsage, Signature, SymbolKind};

/// Bumped whenever the serialized layout changes; older snapshots are rebuilt.
pub const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Data structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    Ok,
    SyntaxError,
    Unreadable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    pub size: u64,
    pub content_hash: String,
    pub status: ParseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol {
    pub file: String,
    pub start_line: usize,
    pub end_line: usize,
    pub name: String,
    pub kind: SymbolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImportEdge {
    pub file: String,
    pub line: usize,
    pub module: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<ImportedName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub conditional: bool,
    pub wildcard: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallEdge {
    pub file: String,
    pub line: usize,
    /// Enclosing function, `None` for module-level calls.
    pub caller: Option<String>,
    pub callee: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LiteralKeyRecord {
    pub file: String,
    pub line: usize,
    pub key: String,
    pub usage: KeyUsage,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassEntry {
    pub file: String,
    pub line: usize,
    pub bases: Vec<String>,
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignatureEntry {
    pub file: String,
    pub line: usize,
    pub qualified_name: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReturnShape {
    pub file: String,
    pub line: usize,
    pub function: String,
    pub shape: DictShape,
}

// ---------------------------------------------------------------------------
// IndexSnapshot
// ---------------------------------------------------------------------------

/// Immutable view of a project's structure at one point in time.
///
/// Every map is ordered and every list is kept sorted (see [`normalize`]) so
/// two snapshots of the same tree serialize identically apart from
/// `built_at`.
///
/// [`normalize`]: IndexSnapshot::normalize
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub format_version: u32,
    pub root: PathBuf,
    pub built_at: DateTime<Utc>,
    pub files: BTreeMap<String, SourceFile>,
    pub symbol_table: BTreeMap<String, Vec<Symbol>>,
    /// Importing file -> its import statements.
    pub import_graph: BTreeMap<String, Vec<ImportEdge>>,
    pub class_table: BTreeMap<String, Vec<ClassEntry>>,
    pub function_signatures: BTreeMap<String, Vec<SignatureEntry>>,
    pub literal_key_catalog: BTreeMap<String, Vec<LiteralKeyRecord>>,
    /// Last callee segment -> call sites.
    pub call_graph: BTreeMap<String, Vec<CallEdge>>,
    /// Function name -> dict literal it returns.
    pub return_shapes: BTreeMap<String, Vec<ReturnShape>>,
    /// Path -> content hash for every tracked file, failed files included.
    pub build_fingerprint: BTreeMap<String, String>,
}

impl IndexSnapshot {
    pub fn empty(root: PathBuf) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            root,
            built_at: Utc::now(),
            files: BTreeMap::new(),
            symbol_table: BTreeMap::new(),
            import_graph: BTreeMap::new(),
            class_table: BTreeMap::new(),
            function_signatures: BTreeMap::new(),
            literal_key_catalog: BTreeMap::new(),
            call_graph: BTreeMap::new(),
            return_shapes: BTreeMap::new(),
            build_fingerprint: BTreeMap::new(),
        }
    }

    /// Add one file's record and, when it parsed, everything extracted from it.
    /// Call [`normalize`](Self::normalize) once after a batch of merges.
    pub fn merge_file(&mut self, file: SourceFile, extract: Option<FileExtract>) {
        let path = file.path.clone();
        self.build_fingerprint
            .insert(path.clone(), file.content_hash.clone());
        self.files.insert(path.clone(), file);

        let Some(extract) = extract else {
            return;
        };

        for sym in &extract.symbols {
            let qualified = match &sym.parent {
                Some(parent) => format!("{parent}.{}", sym.name),
                None => sym.name.clone(),
            };

            match sym.kind {
                SymbolKind::Class => {
                    let methods = extract
                        .symbols
                        .iter()
                        .filter(|m| {
                            m.kind == SymbolKind::Method
                                && m.parent.as_deref() == Some(sym.name.as_str())
                                && m.start_line >= sym.start_line
                                && m.end_line <= sym.end_line
                        })
                        .map(|m| m.name.clone())
                        .collect();
                    self.class_table
                        .entry(sym.name.clone())
                        .or_default()
                        .push(ClassEntry {
                            file: path.clone(),
                            line: sym.start_line,
                            bases: sym.bases.clone(),
                            methods,
                        });
                }
                SymbolKind::Function | SymbolKind::Method => {
                    if let Some(sig) = &sym.signature {
                        self.function_signatures
                            .entry(sym.name.clone())
                            .or_default()
                            .push(SignatureEntry {
                                file: path.clone(),
                                line: sym.start_line,
                                qualified_name: qualified,
                                text: sig.text.clone(),
                            });
                    }
                }
                SymbolKind::Variable => {}
            }

            self.symbol_table
                .entry(sym.name.clone())
                .or_default()
                .push(Symbol {
                    file: path.clone(),
                    start_line: sym.start_line,
                    end_line: sym.end_line,
                    name: sym.name.clone(),
                    kind: sym.kind,
                    parent: sym.parent.clone(),
                    signature: sym.signature.clone(),
                });
        }

        if !extract.imports.is_empty() {
            let edges = self.import_graph.entry(path.clone()).or_default();
            for imp in extract.imports {
                edges.push(ImportEdge {
                    file: path.clone(),
                    line: imp.line,
                    module: imp.module,
                    names: imp.names,
                    alias: imp.alias,
                    conditional: imp.conditional,
                    wildcard: imp.wildcard,
                });
            }
        }

        for call in extract.calls {
            self.call_graph.entry(call.key).or_default().push(CallEdge {
                file: path.clone(),
                line: call.line,
                caller: call.caller,
                callee: call.callee,
            });
        }

        for key in extract.keys {
            self.literal_key_catalog
                .entry(key.key.clone())
                .or_default()
                .push(LiteralKeyRecord {
                    file: path.clone(),
                    line: key.line,
                    key: key.key,
                    usage: key.usage,
                });
        }

        for ret in extract.return_shapes {
            let name = ret
                .function
                .rsplit('.')
                .next()
                .unwrap_or(&ret.function)
                .to_string();
            self.return_shapes.entry(name).or_default().push(ReturnShape {
                file: path.clone(),
                line: ret.line,
                function: ret.function,
                shape: ret.shape,
            });
        }
    }

    /// Drop every entry owned by `path`, including its file record.
    pub fn remove_file_entries(&mut self, path: &str) {
        self.files.remove(path);
        self.build_fingerprint.remove(path);
        self.import_graph.remove(path);

        retain_not_in(&mut self.symbol_table, path, |s| &s.file);
        retain_not_in(&mut self.class_table, path, |c| &c.file);
        retain_not_in(&mut self.function_signatures, path, |s| &s.file);
        retain_not_in(&mut self.literal_key_catalog, path, |k| &k.file);
        retain_not_in(&mut self.call_graph, path, |c| &c.file);
        retain_not_in(&mut self.return_shapes, path, |r| &r.file);
    }

    /// Sort and dedup every list so merge order never shows up in the output.
    pub fn normalize(&mut self) {
        fn sort_all<T: Ord>(map: &mut BTreeMap<String, Vec<T>>) {
            for entries in map.values_mut() {
                entries.sort();
                entries.dedup();
            }
            map.retain(|_, v| !v.is_empty());
        }

        sort_all(&mut self.symbol_table);
        sort_all(&mut self.import_graph);
        sort_all(&mut self.class_table);
        sort_all(&mut self.function_signatures);
        sort_all(&mut self.literal_key_catalog);
        sort_all(&mut self.call_graph);
        sort_all(&mut self.return_shapes);
    }

    /// Structural self-check run after loading and after incremental updates.
    pub fn check_consistency(&self) -> Result<()> {
        if self.format_version != FORMAT_VERSION {
            bail!(
                "format version {} does not match {}",
                self.format_version,
                FORMAT_VERSION
            );
        }

        if self.files.len() != self.build_fingerprint.len() {
            bail!(
                "{} files but {} fingerprint entries",
                self.files.len(),
                self.build_fingerprint.len()
            );
        }
        for (path, file) in &self.files {
            if &file.path != path {
                bail!("file record keyed {path} names {}", file.path);
            }
            match self.build_fingerprint.get(path) {
                Some(hash) if *hash == file.content_hash => {}
                _ => bail!("fingerprint mismatch for {path}"),
            }
        }

        let parsed: BTreeSet<&str> = self
            .files
            .values()
            .filter(|f| f.status == ParseStatus::Ok)
            .map(|f| f.path.as_str())
            .collect();
        let check = |what: &str, file: &str| -> Result<()> {
            if !parsed.contains(file) {
                bail!("{what} entry references untracked or unparsed file {file}");
            }
            Ok(())
        };

        for (name, symbols) in &self.symbol_table {
            for sym in symbols {
                check("symbol", &sym.file)?;
                if &sym.name != name {
                    bail!("symbol {} filed under {name}", sym.name);
                }
            }
        }
        for (file, edges) in &self.import_graph {
            check("import", file)?;
            if edges.iter().any(|e| &e.file != file) {
                bail!("import edge filed under wrong file {file}");
            }
        }
        for entry in self.class_table.values().flatten() {
            check("class", &entry.file)?;
        }
        for entry in self.function_signatures.values().flatten() {
            check("signature", &entry.file)?;
        }
        for entry in self.literal_key_catalog.values().flatten() {
            check("literal key", &entry.file)?;
        }
        for entry in self.call_graph.values().flatten() {
            check("call", &entry.file)?;
        }
        for entry in self.return_shapes.values().flatten() {
            check("return shape", &entry.file)?;
        }
        Ok(())
    }

    /// Equality ignoring `built_at`.
    pub fn same_content(&self, other: &IndexSnapshot) -> bool {
        self.format_version == other.format_version
            && self.root == other.root
            && self.files == other.files
            && self.symbol_table == other.symbol_table
            && self.import_graph == other.import_graph
            && self.class_table == other.class_table
            && self.function_signatures == other.function_signatures
            && self.literal_key_catalog == other.literal_key_catalog
            && self.call_graph == other.call_graph
            && self.return_shapes == other.return_shapes
            && self.build_fingerprint == other.build_fingerprint
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Call sites whose last callee segment is `name`. A dotted query
    /// (`repo.save`) matches on its last segment too.
    pub fn callers(&self, name: &str) -> Vec<&CallEdge> {
        let key = name.rsplit('.').next().unwrap_or(name);
        self.call_graph
            .get(key)
            .map(|edges| edges.iter().collect())
            .unwrap_or_default()
    }

    pub fn class_methods(&self, class_name: &str) -> Vec<&ClassEntry> {
        self.class_table
            .get(class_name)
            .map(|entries| entries.iter().collect())
            .unwrap_or_default()
    }

    pub fn signatures(&self, name: &str) -> Vec<&SignatureEntry> {
        self.function_signatures
            .get(name)
            .map(|entries| entries.iter().collect())
            .unwrap_or_default()
    }

    pub fn files_with_status(&self, status: ParseStatus) -> Vec<&SourceFile> {
        self.files.values().filter(|f| f.status == status).collect()
    }

    pub fn stats(&self) -> SnapshotStats {
        SnapshotStats {
            files: self.files.len(),
            parsed: self.files_with_status(ParseStatus::Ok).len(),
            syntax_errors: self.files_with_status(ParseStatus::SyntaxError).len(),
            unreadable: self.files_with_status(ParseStatus::Unreadable).len(),
            symbols: self.symbol_table.values().map(Vec::len).sum(),
            imports: self.import_graph.values().map(Vec::len).sum(),
            calls: self.call_graph.values().map(Vec::len).sum(),
            literal_keys: self.literal_key_catalog.values().map(Vec::len).sum(),
        }
    }
}

fn retain_not_in<T>(
    map: &mut BTreeMap<String, Vec<T>>,
    path: &str,
    file_of: impl Fn(&T) -> &String,
) {
    for entries in map.values_mut() {
        entries.retain(|e| file_of(e) != path);
    }
    map.retain(|_, v| !v.is_empty());
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotStats {
    pub files: usize,
    pub parsed: usize,
    pub syntax_errors: usize,
    pub unreadable: usize,
    pub symbols: usize,
    pub imports: usize,
    pub calls: usize,
    pub literal_keys: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::ExtractedSymbol;

    fn source_file(path: &str, status: ParseStatus) -> SourceFile {
        SourceFile {
            path: path.to_string(),
            size: 10,
            content_hash: format!("hash-{path}"),
            status,
            detail: None,
        }
    }

    fn function(name: &str, line: usize) -> ExtractedSymbol {
        ExtractedSymbol {
            name: name.to_string(),
            kind: SymbolKind::Function,
            start_line: line,
            end_line: line + 1,
            parent: None,
            signature: None,
            bases: Vec::new(),
        }
    }

    #[test]
    fn remove_file_entries_drops_empty_keys() {
        let mut snap = IndexSnapshot::empty(PathBuf::from("/proj"));
        let mut extract = FileExtract::default();
        extract.symbols.push(function("helper", 1));
        snap.merge_file(source_file("a.py", ParseStatus::Ok), Some(extract.clone()));
        snap.merge_file(source_file("b.py", ParseStatus::Ok), Some(extract));
        snap.normalize();
        assert_eq!(snap.symbol_table["helper"].len(), 2);

        snap.remove_file_entries("a.py");
        assert_eq!(snap.symbol_table["helper"].len(), 1);
        snap.remove_file_entries("b.py");
        assert!(!snap.symbol_table.contains_key("helper"));
        assert!(snap.files.is_empty());
        assert!(snap.check_consistency().is_ok());
    }

    #[test]
    fn consistency_rejects_dangling_entries() {
        let mut snap = IndexSnapshot::empty(PathBuf::from("/proj"));
        let mut extract = FileExtract::default();
        extract.symbols.push(function("helper", 1));
        snap.merge_file(source_file("a.py", ParseStatus::Ok), Some(extract));
        snap.files.remove("a.py");
        snap.build_fingerprint.remove("a.py");
        assert!(snap.check_consistency().is_err());
    }

    #[test]
    fn failed_files_are_tracked_without_entries() {
        let mut snap = IndexSnapshot::empty(PathBuf::from("/proj"));
        snap.merge_file(source_file("broken.py", ParseStatus::SyntaxError), None);
        snap.normalize();
        assert_eq!(snap.stats().syntax_errors, 1);
        assert!(snap.symbol_table.is_empty());
        assert!(snap.check_consistency().is_ok());
    }
}

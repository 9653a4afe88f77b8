use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;

use crate::index::fuzzy::similarity;
use crate::index::{ImportEdge, IndexSnapshot};

// ---------------------------------------------------------------------------
// Module <-> file mapping
// ---------------------------------------------------------------------------

/// `pkg/sub/mod.py` -> `pkg.sub.mod`, `pkg/__init__.py` -> `pkg`.
pub fn module_name_for(path: &str) -> Option<String> {
    let stem = path
        .strip_suffix(".py")
        .or_else(|| path.strip_suffix(".pyi"))?;
    let stem = stem.strip_suffix("/__init__").unwrap_or(stem);
    if stem.is_empty() || stem == "__init__" {
        return None;
    }
    Some(stem.replace('/', "."))
}

/// Resolve an import as written in `importer` to a tracked project file.
/// Returns `None` for third-party and standard-library modules.
pub fn resolve_module(snapshot: &IndexSnapshot, importer: &str, module: &str) -> Option<String> {
    let dots = module.chars().take_while(|c| *c == '.').count();
    let rest = &module[dots..];
    let importer_dir: Vec<&str> = match importer.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').collect(),
        None => Vec::new(),
    };

    let bases: Vec<Vec<&str>> = if dots > 0 {
        // `.` is the importer's package, each extra dot goes one level up.
        let up = dots - 1;
        if up > importer_dir.len() {
            return None;
        }
        vec![importer_dir[..importer_dir.len() - up].to_vec()]
    } else {
        // Project root first, then the importer's own directory for
        // script-style sibling imports.
        let mut bases = vec![Vec::new()];
        if !importer_dir.is_empty() {
            bases.push(importer_dir.clone());
        }
        bases
    };

    for base in bases {
        let mut parts = base;
        if !rest.is_empty() {
            parts.extend(rest.split('.'));
        }
        if parts.is_empty() {
            continue;
        }
        let stem = parts.join("/");
        for candidate in [format!("{stem}.py"), format!("{stem}/__init__.py")] {
            if snapshot.files.contains_key(&candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// ImportGraph: resolved file -> file edges
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportCycle {
    /// Files in import order, starting from the lexicographically smallest.
    pub files: Vec<String>,
    /// At least one edge in the cycle only exists under a condition.
    pub conditional: bool,
}

pub struct ImportGraph {
    /// importer -> imported -> every edge between them is conditional
    edges: BTreeMap<String, BTreeMap<String, bool>>,
}

impl ImportGraph {
    pub fn from_snapshot(snapshot: &IndexSnapshot) -> Self {
        let mut edges: BTreeMap<String, BTreeMap<String, bool>> = BTreeMap::new();

        for (importer, imports) in &snapshot.import_graph {
            for edge in imports {
                for target in targets_of(snapshot, importer, edge) {
                    if &target == importer {
                        continue;
                    }
                    let slot = edges
                        .entry(importer.clone())
                        .or_default()
                        .entry(target)
                        .or_insert(true);
                    *slot = *slot && edge.conditional;
                }
            }
        }

        Self { edges }
    }

    /// Project files `file` imports directly.
    pub fn imports_of(&self, file: &str) -> Vec<&str> {
        self.edges
            .get(file)
            .map(|targets| targets.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Project files that import `file` directly.
    pub fn importers_of(&self, file: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|(_, targets)| targets.contains_key(file))
            .map(|(importer, _)| importer.as_str())
            .collect()
    }

    /// Import cycles found by one depth-first pass. Every strongly connected
    /// component with a cycle is reported at least once, but cycles sharing
    /// a node already explored from an earlier start are not enumerated.
    pub fn cycles(&self) -> Vec<ImportCycle> {
        let mut seen: HashSet<Vec<String>> = HashSet::new();
        let mut found = Vec::new();
        let mut visited: HashSet<&str> = HashSet::new();

        for start in self.edges.keys() {
            if visited.contains(start.as_str()) {
                continue;
            }
            // Iterative DFS: (node, index of the next neighbour to visit).
            let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
            let mut on_path: Vec<&str> = vec![start.as_str()];
            visited.insert(start.as_str());

            while let Some((node, next)) = stack.last_mut() {
                let neighbours = self.imports_of(node);
                if *next >= neighbours.len() {
                    stack.pop();
                    on_path.pop();
                    continue;
                }
                let neighbour = neighbours[*next];
                *next += 1;

                if let Some(pos) = on_path.iter().position(|n| *n == neighbour) {
                    let cycle = canonical_rotation(&on_path[pos..]);
                    if seen.insert(cycle.clone()) {
                        let conditional = self.cycle_is_conditional(&cycle);
                        found.push(ImportCycle {
                            files: cycle,
                            conditional,
                        });
                    }
                    continue;
                }
                if visited.insert(neighbour) {
                    stack.push((neighbour, 0));
                    on_path.push(neighbour);
                }
            }
        }

        found.sort_by(|a, b| a.files.cmp(&b.files));
        found
    }

    fn cycle_is_conditional(&self, cycle: &[String]) -> bool {
        cycle.iter().enumerate().any(|(i, from)| {
            let to = &cycle[(i + 1) % cycle.len()];
            self.edges
                .get(from)
                .and_then(|t| t.get(to))
                .copied()
                .unwrap_or(false)
        })
    }
}

/// Files one import statement pulls in: the module itself, plus submodules
/// named in `from pkg import sub`.
fn targets_of(snapshot: &IndexSnapshot, importer: &str, edge: &ImportEdge) -> BTreeSet<String> {
    let mut targets = BTreeSet::new();
    if let Some(file) = resolve_module(snapshot, importer, &edge.module) {
        targets.insert(file);
    }
    for name in &edge.names {
        let sub = if edge.module.ends_with('.') {
            format!("{}{}", edge.module, name.name)
        } else {
            format!("{}.{}", edge.module, name.name)
        };
        if let Some(file) = resolve_module(snapshot, importer, &sub) {
            targets.insert(file);
        }
    }
    targets
}

fn canonical_rotation(cycle: &[&str]) -> Vec<String> {
    let start = cycle
        .iter()
        .enumerate()
        .min_by_key(|(_, name)| **name)
        .map(|(i, _)| i)
        .unwrap_or(0);
    cycle[start..]
        .iter()
        .chain(cycle[..start].iter())
        .map(|s| s.to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Module search
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleMatchKind {
    Exact,
    /// Module now lives under an extra package prefix (`utils` -> `shared.utils`).
    PrefixAdded,
    /// Query skips a package level (`api.users` -> `api.v2.users`).
    IntermediateMissing,
    /// Same last segment, otherwise different path.
    PathChanged,
    /// Last segment is a near miss.
    Fuzzy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleMatch {
    pub module: String,
    pub file: String,
    pub kind: ModuleMatchKind,
    pub confidence: f64,
    pub is_package: bool,
    /// Package segments the query is missing, for `PrefixAdded` and
    /// `IntermediateMissing`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

/// Find where a dotted module lives, or where it probably moved to.
pub fn search_module(
    snapshot: &IndexSnapshot,
    query: &str,
    fuzzy: bool,
    floor: f64,
) -> Vec<ModuleMatch> {
    let query_parts: Vec<&str> = query.split('.').filter(|p| !p.is_empty()).collect();
    let Some(target) = query_parts.last().copied() else {
        return Vec::new();
    };

    let mut matches: Vec<ModuleMatch> = Vec::new();
    for path in snapshot.files.keys() {
        let Some(module) = module_name_for(path) else {
            continue;
        };
        let is_package = path.ends_with("__init__.py");
        let parts: Vec<&str> = module.split('.').collect();
        if let Some(m) = match_module(&query_parts, target, &module, &parts, fuzzy, floor) {
            matches.push(ModuleMatch {
                file: path.clone(),
                is_package,
                ..m
            });
        }
    }

    matches.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.module.cmp(&b.module))
            .then_with(|| a.file.cmp(&b.file))
    });
    let mut seen = HashSet::new();
    matches.retain(|m| seen.insert(m.module.clone()));
    matches
}

fn match_module(
    query: &[&str],
    target: &str,
    module: &str,
    parts: &[&str],
    fuzzy: bool,
    floor: f64,
) -> Option<ModuleMatch> {
    let make = |kind, confidence: f64, missing: Vec<String>| ModuleMatch {
        module: module.to_string(),
        file: String::new(),
        kind,
        confidence: (confidence * 100.0).round() / 100.0,
        is_package: false,
        missing,
    };

    if parts == query {
        return Some(make(ModuleMatchKind::Exact, 1.0, Vec::new()));
    }

    if parts.last() == Some(&target) {
        let score = path_similarity(query, parts);
        if score > 0.5 {
            let (kind, missing) = classify_path_diff(query, parts);
            return Some(make(kind, score, missing));
        }
    }

    if fuzzy {
        let last = parts.last().copied().unwrap_or("");
        let dist = strsim::levenshtein(target, last);
        let mut score = similarity(target, last);
        if dist <= 2 {
            score = score.max(0.85);
        }
        if score >= floor {
            return Some(make(ModuleMatchKind::Fuzzy, score * 0.8, Vec::new()));
        }
    }
    None
}

/// Share of query segments found in order within `actual`. A full match is
/// discounted by how much longer the actual path is.
fn path_similarity(query: &[&str], actual: &[&str]) -> f64 {
    let mut common = 0;
    let mut j = 0;
    for part in query {
        if let Some(k) = actual[j..].iter().position(|a| a == part) {
            common += 1;
            j += k + 1;
        }
    }
    if query.is_empty() {
        return 0.0;
    }
    let ratio = common as f64 / query.len() as f64;
    if common == query.len() {
        let diff = actual.len().abs_diff(query.len()) as f64;
        let length_penalty = 1.0 - diff * 0.1;
        return (ratio * length_penalty.max(0.7)).min(0.95);
    }
    ratio * 0.8
}

fn classify_path_diff(query: &[&str], actual: &[&str]) -> (ModuleMatchKind, Vec<String>) {
    if actual.len() > query.len() && actual.ends_with(query) {
        let prefix = actual[..actual.len() - query.len()]
            .iter()
            .map(|s| s.to_string())
            .collect();
        return (ModuleMatchKind::PrefixAdded, prefix);
    }

    let common = query
        .iter()
        .zip(actual)
        .take_while(|(q, a)| q == a)
        .count();
    if common > 0 {
        let mut missing = Vec::new();
        let remaining = &actual[common..];
        let mut j = 0;
        for part in &query[common..] {
            match remaining[j..].iter().position(|a| a == part) {
                Some(k) => {
                    missing.extend(remaining[j..j + k].iter().map(|s| s.to_string()));
                    j += k + 1;
                }
                None => break,
            }
        }
        if !missing.is_empty() {
            return (ModuleMatchKind::IntermediateMissing, missing);
        }
    }

    (ModuleMatchKind::PathChanged, Vec::new())
}

use serde::Serialize;

use super::fuzzy::similarity;
use super::snapshot::{IndexSnapshot, LiteralKeyRecord, ReturnShape};
use crate::grammar::DictShape;

/// Max edit distance for a returned-dict key to count as a likely typo.
const TYPO_DISTANCE: usize = 2;

#[derive(Debug, Clone, Serialize)]
pub struct KeyMatch {
    pub key: String,
    pub similarity: f64,
    pub exact: bool,
    pub records: Vec<LiteralKeyRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginKind {
    /// Top-level key of a returned dict.
    Exact,
    /// Found one or more levels down (`d["logging"]["level"]`).
    Nested,
    /// `log_level` split across a parent and child key (`logging.level`).
    Restructured,
    /// Top-level key within a small edit distance.
    Fuzzy,
}

/// A function whose returned dict could be where a missing key went.
#[derive(Debug, Clone, Serialize)]
pub struct KeyOrigin {
    pub kind: OriginKind,
    pub function: String,
    pub file: String,
    pub line: usize,
    /// Key path from the returned dict down to the match.
    pub path: Vec<String>,
    pub confidence: f64,
}

impl KeyOrigin {
    /// `["logging"]["level"]`
    pub fn access_path(&self) -> String {
        self.path.iter().map(|k| format!("[\"{k}\"]")).collect()
    }
}

impl IndexSnapshot {
    /// Catalog lookup for a literal key: exact first, else every cataloged key
    /// at or above `floor`, most similar first.
    pub fn search_literal_key(&self, key: &str, fuzzy: bool, floor: f64) -> Vec<KeyMatch> {
        if let Some(records) = self.literal_key_catalog.get(key) {
            return vec![KeyMatch {
                key: key.to_string(),
                similarity: 1.0,
                exact: true,
                records: records.clone(),
            }];
        }
        if !fuzzy {
            return Vec::new();
        }

        let mut matches: Vec<KeyMatch> = self
            .literal_key_catalog
            .iter()
            .filter_map(|(candidate, records)| {
                let score = similarity(key, candidate);
                (score >= floor).then(|| KeyMatch {
                    key: candidate.clone(),
                    similarity: score,
                    exact: false,
                    records: records.clone(),
                })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.key.cmp(&b.key))
        });
        matches
    }

    /// Functions returning a dict that has, nests, restructures or nearly
    /// spells `missing`. Highest confidence first.
    pub fn key_origins(&self, missing: &str) -> Vec<KeyOrigin> {
        let mut origins = Vec::new();
        for ret in self.return_shapes.values().flatten() {
            collect_origins(ret, missing, &mut origins);
        }
        origins.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.kind.cmp(&b.kind))
                .then_with(|| a.file.cmp(&b.file))
                .then_with(|| a.line.cmp(&b.line))
        });
        origins
    }
}

fn collect_origins(ret: &ReturnShape, missing: &str, out: &mut Vec<KeyOrigin>) {
    let origin = |kind, path: Vec<String>, confidence| KeyOrigin {
        kind,
        function: ret.function.clone(),
        file: ret.file.clone(),
        line: ret.line,
        path,
        confidence,
    };

    if ret.shape.keys.iter().any(|k| k == missing) {
        out.push(origin(OriginKind::Exact, vec![missing.to_string()], 1.0));
        return;
    }

    let mut prefix = Vec::new();
    collect_nested(&ret.shape, missing, &mut prefix, &mut |kind, path, confidence| {
        out.push(origin(kind, path, confidence))
    });

    let lowered = missing.to_lowercase();
    for key in &ret.shape.keys {
        let dist = strsim::levenshtein(&lowered, &key.to_lowercase());
        if dist > 0 && dist <= TYPO_DISTANCE {
            let longest = missing.chars().count().max(key.chars().count()).max(1);
            let confidence = 1.0 - dist as f64 / longest as f64;
            out.push(origin(
                OriginKind::Fuzzy,
                vec![key.clone()],
                (confidence * 100.0).round() / 100.0,
            ));
        }
    }
}

fn collect_nested(
    shape: &DictShape,
    missing: &str,
    prefix: &mut Vec<String>,
    emit: &mut dyn FnMut(OriginKind, Vec<String>, f64),
) {
    let split = missing.split_once('_');

    for (parent, nested) in &shape.nested {
        prefix.push(parent.clone());

        if nested.keys.iter().any(|k| k == missing) {
            let mut path = prefix.clone();
            path.push(missing.to_string());
            emit(OriginKind::Nested, path, 0.95);
        }

        if let Some((head, rest)) = split {
            let parent_lower = parent.to_lowercase();
            let head_lower = head.to_lowercase();
            if !head.is_empty() && parent_lower.starts_with(&head_lower) {
                for child in &nested.keys {
                    if child.eq_ignore_ascii_case(rest) {
                        let mut path = prefix.clone();
                        path.push(child.clone());
                        emit(OriginKind::Restructured, path, 0.9);
                    }
                }
            }
        }

        collect_nested(nested, missing, prefix, emit);
        prefix.pop();
    }
}

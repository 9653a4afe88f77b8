use serde::Serialize;

use super::snapshot::{IndexSnapshot, Symbol};

/// Where a candidate lives relative to the file the lookup came from.
/// Variant order is ranking order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reachability {
    SameFile,
    SamePackage,
    Elsewhere,
}

#[derive(Debug, Clone, Serialize)]
pub struct SymbolMatch {
    pub symbol: Symbol,
    pub similarity: f64,
    pub exact: bool,
    pub reachability: Reachability,
}

/// Case-insensitive normalized Levenshtein similarity in [0, 1].
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&a.to_lowercase(), &b.to_lowercase())
}

/// Same file, same directory, or anywhere else. Without a context file every
/// candidate is `Elsewhere`.
pub fn reachability(context_file: Option<&str>, file: &str) -> Reachability {
    let Some(ctx) = context_file else {
        return Reachability::Elsewhere;
    };
    if ctx == file {
        return Reachability::SameFile;
    }
    if parent_dir(ctx) == parent_dir(file) {
        Reachability::SamePackage
    } else {
        Reachability::Elsewhere
    }
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

impl IndexSnapshot {
    /// Exact name match first. With `fuzzy`, fall back to every known name at
    /// or above `floor`, ranked by similarity, then reachability from
    /// `context_file`, then name and location.
    pub fn search_symbol(
        &self,
        name: &str,
        fuzzy: bool,
        context_file: Option<&str>,
        floor: f64,
    ) -> Vec<SymbolMatch> {
        if let Some(symbols) = self.symbol_table.get(name) {
            let mut matches: Vec<SymbolMatch> = symbols
                .iter()
                .map(|s| SymbolMatch {
                    symbol: s.clone(),
                    similarity: 1.0,
                    exact: true,
                    reachability: reachability(context_file, &s.file),
                })
                .collect();
            matches.sort_by(|a, b| {
                a.reachability
                    .cmp(&b.reachability)
                    .then_with(|| a.symbol.cmp(&b.symbol))
            });
            return matches;
        }

        if !fuzzy {
            return Vec::new();
        }

        let mut matches = Vec::new();
        for (candidate, symbols) in &self.symbol_table {
            let score = similarity(name, candidate);
            if score < floor {
                continue;
            }
            for s in symbols {
                matches.push(SymbolMatch {
                    symbol: s.clone(),
                    similarity: score,
                    exact: false,
                    reachability: reachability(context_file, &s.file),
                });
            }
        }

        matches.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.reachability.cmp(&b.reachability))
                .then_with(|| a.symbol.name.cmp(&b.symbol.name))
                .then_with(|| a.symbol.file.cmp(&b.symbol.file))
                .then_with(|| a.symbol.start_line.cmp(&b.symbol.start_line))
        });
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similarity_ignores_case() {
        assert_eq!(similarity("LoadData", "loaddata"), 1.0);
        assert!(similarity("calcTotl", "calcTotal") > 0.85);
        assert!(similarity("foo", "completely_different") < 0.6);
    }

    #[test]
    fn reachability_prefers_same_directory() {
        assert_eq!(reachability(Some("pkg/a.py"), "pkg/a.py"), Reachability::SameFile);
        assert_eq!(reachability(Some("pkg/a.py"), "pkg/b.py"), Reachability::SamePackage);
        assert_eq!(reachability(Some("pkg/a.py"), "other/b.py"), Reachability::Elsewhere);
        assert_eq!(reachability(Some("a.py"), "b.py"), Reachability::SamePackage);
        assert_eq!(reachability(None, "b.py"), Reachability::Elsewhere);
    }
}

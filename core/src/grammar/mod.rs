pub mod python;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Symbol kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    /// Module-level assignment target.
    Variable,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
            SymbolKind::Variable => "variable",
        }
    }
}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Positional,
    KeywordOnly,
    /// `*args`
    VarArgs,
    /// `**kwargs`
    VarKeyword,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Signature {
    /// Declaration header as written, whitespace collapsed (`def f(a, b=1) -> int:`).
    pub text: String,
    pub params: Vec<Param>,
    /// Arguments a caller must supply (excluding a bound `self`/`cls`).
    pub min_arity: usize,
    /// Positional slots available, `None` when `*args` accepts any number.
    pub max_arity: Option<usize>,
}

// ---------------------------------------------------------------------------
// Extracted data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedSymbol {
    pub name: String,
    pub kind: SymbolKind,
    pub start_line: usize,
    pub end_line: usize,
    /// Enclosing class or function name, if nested.
    pub parent: Option<String>,
    pub signature: Option<Signature>,
    /// Base-class expressions (classes only).
    pub bases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImportedName {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedImport {
    /// Module as written; relative imports keep their leading dots.
    pub module: String,
    /// Names pulled in by `from module import ...`; empty for `import module`.
    pub names: Vec<ImportedName>,
    /// `import module as alias`
    pub alias: Option<String>,
    pub line: usize,
    /// Nested in a conditional, `try`, `with`, loop or function body.
    pub conditional: bool,
    /// `from module import *`
    pub wildcard: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedCall {
    /// Innermost enclosing function, `None` at module level.
    pub caller: Option<String>,
    /// Callee expression as written (`load_data`, `self.repo.save`).
    pub callee: String,
    /// Last identifier of the callee, used as the call-graph key.
    pub key: String,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyUsage {
    /// `{"key": ...}`
    Construction,
    /// `d["key"]`, `d.get("key")`
    Access,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedKey {
    pub key: String,
    pub line: usize,
    pub usage: KeyUsage,
}

/// Key structure of a dict literal, nested dict values included.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DictShape {
    pub keys: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub nested: BTreeMap<String, DictShape>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedReturnShape {
    /// Qualified function name (`Config.as_dict` for methods).
    pub function: String,
    pub line: usize,
    pub shape: DictShape,
}

/// Everything one walk over a file produces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileExtract {
    pub symbols: Vec<ExtractedSymbol>,
    pub imports: Vec<ExtractedImport>,
    pub calls: Vec<ExtractedCall>,
    pub keys: Vec<ExtractedKey>,
    pub return_shapes: Vec<ExtractedReturnShape>,
}

/// Result of parsing one file. Parsing never panics or errors out; a file that
/// does not parse cleanly is reported as `SyntaxError`.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(FileExtract),
    SyntaxError { line: usize, message: String },
}

// ---------------------------------------------------------------------------
// Grammar trait
// ---------------------------------------------------------------------------

pub trait Grammar: Send + Sync {
    fn language(&self) -> tree_sitter::Language;
    fn file_extensions(&self) -> &[&str];
    fn extract(&self, source: &[u8], tree: &tree_sitter::Tree) -> FileExtract;
}

/// Parse `source` with `grammar` and extract declarations and edges.
pub fn parse_source(grammar: &dyn Grammar, source: &[u8]) -> ParseOutcome {
    let mut parser = tree_sitter::Parser::new();
    if let Err(err) = parser.set_language(&grammar.language()) {
        return ParseOutcome::SyntaxError {
            line: 0,
            message: format!("set_language error: {err}"),
        };
    }

    let tree = match parser.parse(source, None) {
        Some(t) => t,
        None => {
            return ParseOutcome::SyntaxError {
                line: 0,
                message: "parse returned None".to_string(),
            }
        }
    };

    let root = tree.root_node();
    if root.has_error() {
        let line = first_error_line(&root).unwrap_or(0);
        return ParseOutcome::SyntaxError {
            line,
            message: format!("syntax error near line {line}"),
        };
    }

    ParseOutcome::Parsed(grammar.extract(source, &tree))
}

/// 1-based line of the first ERROR or MISSING node, descending only into
/// subtrees that contain one.
fn first_error_line(root: &tree_sitter::Node) -> Option<usize> {
    let mut stack = vec![*root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return Some(node.start_position().row + 1);
        }
        let mut cursor = node.walk();
        let children: Vec<_> = node
            .children(&mut cursor)
            .filter(|c| c.has_error())
            .collect();
        for child in children.into_iter().rev() {
            stack.push(child);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub struct GrammarRegistry {
    grammars: Vec<Box<dyn Grammar>>,
}

impl GrammarRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            grammars: Vec::new(),
        };
        registry.register(Box::new(python::PythonGrammar));
        registry
    }

    pub fn register(&mut self, grammar: Box<dyn Grammar>) {
        self.grammars.push(grammar);
    }

    /// Look up the grammar that handles a given file extension (without the dot).
    pub fn for_extension(&self, ext: &str) -> Option<&dyn Grammar> {
        self.grammars
            .iter()
            .find(|g| g.file_extensions().contains(&ext))
            .map(|g| g.as_ref())
    }

    pub fn for_path(&self, path: &Path) -> Option<&dyn Grammar> {
        let ext = path.extension()?.to_str()?;
        self.for_extension(ext)
    }

    /// Every extension any registered grammar accepts.
    pub fn extensions(&self) -> Vec<String> {
        self.grammars
            .iter()
            .flat_map(|g| g.file_extensions().iter().map(|e| e.to_string()))
            .collect()
    }
}

impl Default for GrammarRegistry {
    fn default() -> Self {
        Self::new()
    }
}

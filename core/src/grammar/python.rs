use std::collections::BTreeMap;

use tree_sitter::{Language, Node, Tree};

use super::{
    DictShape, ExtractedCall, ExtractedImport, ExtractedKey, ExtractedReturnShape,
    ExtractedSymbol, FileExtract, Grammar, ImportedName, KeyUsage, Param, ParamKind, Signature,
    SymbolKind,
};

/// Dict literals nested deeper than this are not described in return shapes.
const MAX_SHAPE_DEPTH: usize = 3;

/// Ancestors that make an import conditional or deferred.
const CONDITIONAL_SCOPES: &[&str] = &[
    "if_statement",
    "try_statement",
    "with_statement",
    "for_statement",
    "while_statement",
    "match_statement",
    "function_definition",
];

/// Mapping methods whose first string argument is a key access.
const KEY_ACCESS_METHODS: &[&str] = &["get", "pop", "setdefault"];

pub struct PythonGrammar;

impl Grammar for PythonGrammar {
    fn language(&self) -> Language {
        tree_sitter_python::LANGUAGE.into()
    }

    fn file_extensions(&self) -> &[&str] {
        &["py", "pyi"]
    }

    fn extract(&self, source: &[u8], tree: &Tree) -> FileExtract {
        let root = tree.root_node();
        let mut out = FileExtract::default();
        collect_declarations(&root, source, &Scope::module(), &mut out);
        collect_imports(&root, source, &mut out.imports);
        collect_calls_and_keys(&root, source, &mut out);
        out
    }
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Module,
    Class,
    Function,
}

#[derive(Debug, Clone)]
struct Scope {
    kind: ScopeKind,
    /// Qualified name of the enclosing declaration (`Outer.Inner`).
    name: Option<String>,
}

impl Scope {
    fn module() -> Self {
        Self {
            kind: ScopeKind::Module,
            name: None,
        }
    }

    fn enter(&self, kind: ScopeKind, name: &str) -> Self {
        Self {
            kind,
            name: Some(self.qualify(name)),
        }
    }

    fn qualify(&self, name: &str) -> String {
        match &self.name {
            Some(outer) => format!("{outer}.{name}"),
            None => name.to_string(),
        }
    }

    /// Innermost enclosing name (the last dotted segment).
    fn parent(&self) -> Option<String> {
        self.name
            .as_deref()
            .map(|n| n.rsplit('.').next().unwrap_or(n).to_string())
    }
}

fn collect_declarations(block: &Node, source: &[u8], scope: &Scope, out: &mut FileExtract) {
    let mut cursor = block.walk();
    for child in block.children(&mut cursor) {
        visit_statement(&child, source, scope, out);
    }
}

fn visit_statement(node: &Node, source: &[u8], scope: &Scope, out: &mut FileExtract) {
    match node.kind() {
        "function_definition" => {
            let Some(sym) = extract_function(node, source, scope) else {
                return;
            };
            if let Some(shape) = extract_return_shape(node, source) {
                out.return_shapes.push(ExtractedReturnShape {
                    function: scope.qualify(&sym.name),
                    line: sym.start_line,
                    shape,
                });
            }
            let inner = scope.enter(ScopeKind::Function, &sym.name);
            out.symbols.push(sym);
            if let Some(body) = node.child_by_field_name("body") {
                collect_declarations(&body, source, &inner, out);
            }
        }
        "class_definition" => {
            let Some(sym) = extract_class(node, source, scope) else {
                return;
            };
            let inner = scope.enter(ScopeKind::Class, &sym.name);
            out.symbols.push(sym);
            if let Some(body) = node.child_by_field_name("body") {
                collect_declarations(&body, source, &inner, out);
            }
        }
        "decorated_definition" => {
            if let Some(def) = node.child_by_field_name("definition") {
                visit_statement(&def, source, scope, out);
            }
        }
        "expression_statement" if scope.kind == ScopeKind::Module => {
            collect_module_assignments(node, source, &mut out.symbols);
        }
        // Compound statements keep the current scope: definitions under
        // `if`/`try` are still declarations of the enclosing scope.
        "if_statement" | "elif_clause" | "else_clause" | "try_statement" | "except_clause"
        | "finally_clause" | "with_statement" | "for_statement" | "while_statement"
        | "block" => {
            collect_declarations(node, source, scope, out);
        }
        _ => {}
    }
}

fn extract_function(node: &Node, source: &[u8], scope: &Scope) -> Option<ExtractedSymbol> {
    let name_node = node.child_by_field_name("name")?;
    let name = node_text(&name_node, source);
    if name.is_empty() {
        return None;
    }
    let is_method = scope.kind == ScopeKind::Class;
    let signature = extract_signature(node, source, is_method);
    Some(ExtractedSymbol {
        name,
        kind: if is_method {
            SymbolKind::Method
        } else {
            SymbolKind::Function
        },
        start_line: node.start_position().row + 1,
        end_line: node.end_position().row + 1,
        parent: scope.parent(),
        signature: Some(signature),
        bases: Vec::new(),
    })
}

fn extract_class(node: &Node, source: &[u8], scope: &Scope) -> Option<ExtractedSymbol> {
    let name_node = node.child_by_field_name("name")?;
    let name = node_text(&name_node, source);
    if name.is_empty() {
        return None;
    }

    let mut bases = Vec::new();
    if let Some(superclasses) = node.child_by_field_name("superclasses") {
        let mut cursor = superclasses.walk();
        for base in superclasses.named_children(&mut cursor) {
            // `metaclass=...` and other keyword arguments are not bases.
            if base.kind() != "keyword_argument" && base.kind() != "comment" {
                bases.push(collapse_whitespace(&node_text(&base, source)));
            }
        }
    }

    Some(ExtractedSymbol {
        name,
        kind: SymbolKind::Class,
        start_line: node.start_position().row + 1,
        end_line: node.end_position().row + 1,
        parent: scope.parent(),
        signature: None,
        bases,
    })
}

/// Module-level `name = ...` / `a, b = ...` / `name: T = ...` targets.
fn collect_module_assignments(stmt: &Node, source: &[u8], out: &mut Vec<ExtractedSymbol>) {
    let mut cursor = stmt.walk();
    for child in stmt.named_children(&mut cursor) {
        if child.kind() != "assignment" {
            continue;
        }
        let Some(left) = child.child_by_field_name("left") else {
            continue;
        };
        let line = child.start_position().row + 1;
        let end_line = child.end_position().row + 1;
        let mut targets = Vec::new();
        match left.kind() {
            "identifier" => targets.push(node_text(&left, source)),
            "pattern_list" | "tuple_pattern" | "list_pattern" => {
                let mut inner = left.walk();
                for target in left.named_children(&mut inner) {
                    if target.kind() == "identifier" {
                        targets.push(node_text(&target, source));
                    }
                }
            }
            _ => {}
        }
        for name in targets.into_iter().filter(|n| !n.is_empty()) {
            out.push(ExtractedSymbol {
                name,
                kind: SymbolKind::Variable,
                start_line: line,
                end_line,
                parent: None,
                signature: None,
                bases: Vec::new(),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

/// Header text (everything before the body block) plus structured parameters.
fn extract_signature(node: &Node, source: &[u8], is_method: bool) -> Signature {
    let text = match node.child_by_field_name("body") {
        Some(body) => {
            let raw = &source[node.start_byte()..body.start_byte()];
            collapse_whitespace(String::from_utf8_lossy(raw).trim())
        }
        None => collapse_whitespace(&node_text(node, source)),
    };

    let params = node
        .child_by_field_name("parameters")
        .map(|p| extract_params(&p, source))
        .unwrap_or_default();

    let skip_receiver = is_method
        && params
            .first()
            .map(|p| p.kind == ParamKind::Positional && (p.name == "self" || p.name == "cls"))
            .unwrap_or(false);
    let callable: Vec<&Param> = params.iter().skip(usize::from(skip_receiver)).collect();

    let min_arity = callable
        .iter()
        .filter(|p| {
            matches!(p.kind, ParamKind::Positional | ParamKind::KeywordOnly) && p.default.is_none()
        })
        .count();
    let max_arity = if callable.iter().any(|p| p.kind == ParamKind::VarArgs) {
        None
    } else {
        Some(
            callable
                .iter()
                .filter(|p| p.kind == ParamKind::Positional)
                .count(),
        )
    };

    Signature {
        text,
        params,
        min_arity,
        max_arity,
    }
}

fn extract_params(params: &Node, source: &[u8]) -> Vec<Param> {
    let mut out = Vec::new();
    // Parameters after a bare `*` or after `*args` are keyword-only.
    let mut keyword_only = false;
    let positional = |kw: bool| {
        if kw {
            ParamKind::KeywordOnly
        } else {
            ParamKind::Positional
        }
    };

    let mut cursor = params.walk();
    for child in params.named_children(&mut cursor) {
        match child.kind() {
            "identifier" => out.push(Param {
                name: node_text(&child, source),
                kind: positional(keyword_only),
                default: None,
            }),
            "typed_parameter" => {
                let mut inner = child.walk();
                let Some(first) = child.named_children(&mut inner).next() else {
                    continue;
                };
                match first.kind() {
                    "list_splat_pattern" => {
                        keyword_only = true;
                        out.push(Param {
                            name: splat_name(&first, source),
                            kind: ParamKind::VarArgs,
                            default: None,
                        });
                    }
                    "dictionary_splat_pattern" => out.push(Param {
                        name: splat_name(&first, source),
                        kind: ParamKind::VarKeyword,
                        default: None,
                    }),
                    _ => out.push(Param {
                        name: node_text(&first, source),
                        kind: positional(keyword_only),
                        default: None,
                    }),
                }
            }
            "default_parameter" | "typed_default_parameter" => {
                let Some(name) = child.child_by_field_name("name") else {
                    continue;
                };
                let default = child
                    .child_by_field_name("value")
                    .map(|v| collapse_whitespace(&node_text(&v, source)));
                out.push(Param {
                    name: node_text(&name, source),
                    kind: positional(keyword_only),
                    default,
                });
            }
            "list_splat_pattern" => {
                keyword_only = true;
                out.push(Param {
                    name: splat_name(&child, source),
                    kind: ParamKind::VarArgs,
                    default: None,
                });
            }
            "dictionary_splat_pattern" => out.push(Param {
                name: splat_name(&child, source),
                kind: ParamKind::VarKeyword,
                default: None,
            }),
            "keyword_separator" => keyword_only = true,
            _ => {}
        }
    }
    out
}

fn splat_name(node: &Node, source: &[u8]) -> String {
    node_text(node, source).trim_start_matches('*').trim().to_string()
}

// ---------------------------------------------------------------------------
// Return shapes
// ---------------------------------------------------------------------------

/// Key structure of the first `return {...}` in a function body, ignoring
/// nested functions, classes and lambdas.
fn extract_return_shape(func: &Node, source: &[u8]) -> Option<DictShape> {
    let body = func.child_by_field_name("body")?;
    let mut stack: Vec<Node> = vec![body];
    while let Some(node) = stack.pop() {
        if node.kind() == "return_statement" {
            let mut cursor = node.walk();
            let value = node.named_children(&mut cursor).next();
            if let Some(value) = value.filter(|v| v.kind() == "dictionary") {
                if let Some(shape) = dict_shape(&value, source, 0) {
                    return Some(shape);
                }
            }
            continue;
        }
        if matches!(
            node.kind(),
            "function_definition" | "class_definition" | "lambda"
        ) {
            continue;
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for child in children.into_iter().rev() {
            stack.push(child);
        }
    }
    None
}

fn dict_shape(dict: &Node, source: &[u8], depth: usize) -> Option<DictShape> {
    if depth > MAX_SHAPE_DEPTH {
        return None;
    }
    let mut shape = DictShape::default();
    let mut nested = BTreeMap::new();

    let mut cursor = dict.walk();
    for pair in dict.named_children(&mut cursor) {
        if pair.kind() != "pair" {
            continue;
        }
        let Some(key) = pair
            .child_by_field_name("key")
            .and_then(|k| string_literal(&k, source))
        else {
            continue;
        };
        if let Some(value) = pair
            .child_by_field_name("value")
            .filter(|v| v.kind() == "dictionary")
        {
            if let Some(inner) = dict_shape(&value, source, depth + 1) {
                nested.insert(key.clone(), inner);
            }
        }
        shape.keys.push(key);
    }

    shape.nested = nested;
    if shape.keys.is_empty() {
        None
    } else {
        Some(shape)
    }
}

// ---------------------------------------------------------------------------
// Imports
// ---------------------------------------------------------------------------

fn collect_imports(root: &Node, source: &[u8], out: &mut Vec<ExtractedImport>) {
    let mut stack: Vec<Node> = vec![*root];
    while let Some(node) = stack.pop() {
        match node.kind() {
            "import_statement" => {
                extract_plain_import(&node, source, out);
                continue;
            }
            "import_from_statement" => {
                if let Some(import) = extract_from_import(&node, source) {
                    out.push(import);
                }
                continue;
            }
            _ => {}
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for child in children.into_iter().rev() {
            stack.push(child);
        }
    }
}

/// `import a.b, c as d` produces one edge per module.
fn extract_plain_import(node: &Node, source: &[u8], out: &mut Vec<ExtractedImport>) {
    let line = node.start_position().row + 1;
    let conditional = is_conditional(node);
    let mut cursor = node.walk();
    for name in node.children_by_field_name("name", &mut cursor) {
        let (module, alias) = match name.kind() {
            "dotted_name" => (node_text(&name, source), None),
            "aliased_import" => {
                let Some(module) = name.child_by_field_name("name") else {
                    continue;
                };
                let alias = name
                    .child_by_field_name("alias")
                    .map(|a| node_text(&a, source));
                (node_text(&module, source), alias)
            }
            _ => continue,
        };
        if module.is_empty() {
            continue;
        }
        out.push(ExtractedImport {
            module,
            names: Vec::new(),
            alias,
            line,
            conditional,
            wildcard: false,
        });
    }
}

fn extract_from_import(node: &Node, source: &[u8]) -> Option<ExtractedImport> {
    let module_node = node.child_by_field_name("module_name")?;
    let module: String = node_text(&module_node, source)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if module.is_empty() {
        return None;
    }

    let mut names = Vec::new();
    let mut cursor = node.walk();
    for name in node.children_by_field_name("name", &mut cursor) {
        match name.kind() {
            "dotted_name" => names.push(ImportedName {
                name: node_text(&name, source),
                alias: None,
            }),
            "aliased_import" => {
                let Some(inner) = name.child_by_field_name("name") else {
                    continue;
                };
                names.push(ImportedName {
                    name: node_text(&inner, source),
                    alias: name
                        .child_by_field_name("alias")
                        .map(|a| node_text(&a, source)),
                });
            }
            _ => {}
        }
    }

    let mut cursor = node.walk();
    let wildcard = node
        .children(&mut cursor)
        .any(|c| c.kind() == "wildcard_import");

    Some(ExtractedImport {
        module,
        names,
        alias: None,
        line: node.start_position().row + 1,
        conditional: is_conditional(node),
        wildcard,
    })
}

fn is_conditional(node: &Node) -> bool {
    let mut current = node.parent();
    while let Some(n) = current {
        if CONDITIONAL_SCOPES.contains(&n.kind()) {
            return true;
        }
        current = n.parent();
    }
    false
}

// ---------------------------------------------------------------------------
// Calls and literal keys
// ---------------------------------------------------------------------------

fn collect_calls_and_keys(root: &Node, source: &[u8], out: &mut FileExtract) {
    let mut stack: Vec<Node> = vec![*root];
    while let Some(node) = stack.pop() {
        match node.kind() {
            "call" => {
                if let Some(call) = extract_call(&node, source) {
                    out.calls.push(call);
                }
                if let Some(key) = extract_method_key_access(&node, source) {
                    out.keys.push(key);
                }
            }
            "dictionary" => {
                let mut cursor = node.walk();
                for pair in node.named_children(&mut cursor) {
                    if pair.kind() != "pair" {
                        continue;
                    }
                    if let Some(key_node) = pair.child_by_field_name("key") {
                        if let Some(key) = string_literal(&key_node, source) {
                            out.keys.push(ExtractedKey {
                                key,
                                line: key_node.start_position().row + 1,
                                usage: KeyUsage::Construction,
                            });
                        }
                    }
                }
            }
            "subscript" => {
                if let Some(index) = node.child_by_field_name("subscript") {
                    if let Some(key) = string_literal(&index, source) {
                        out.keys.push(ExtractedKey {
                            key,
                            line: index.start_position().row + 1,
                            usage: KeyUsage::Access,
                        });
                    }
                }
            }
            _ => {}
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for child in children.into_iter().rev() {
            stack.push(child);
        }
    }
}

/// Callee of a `call` node. Handles `foo()` and `obj.method()`; other callee
/// shapes (`x[0]()`, `f()()`) are skipped.
fn extract_call(node: &Node, source: &[u8]) -> Option<ExtractedCall> {
    let func = node.child_by_field_name("function")?;
    let key = match func.kind() {
        "identifier" => node_text(&func, source),
        "attribute" => node_text(&func.child_by_field_name("attribute")?, source),
        _ => return None,
    };
    if key.is_empty() {
        return None;
    }
    Some(ExtractedCall {
        caller: find_enclosing_function(node, source),
        callee: node_text(&func, source)
            .split_whitespace()
            .collect::<String>(),
        key,
        line: node.start_position().row + 1,
    })
}

/// `d.get("key")`, `d.pop("key")`, `d.setdefault("key", ...)`.
fn extract_method_key_access(node: &Node, source: &[u8]) -> Option<ExtractedKey> {
    let func = node.child_by_field_name("function")?;
    if func.kind() != "attribute" {
        return None;
    }
    let method = node_text(&func.child_by_field_name("attribute")?, source);
    if !KEY_ACCESS_METHODS.contains(&method.as_str()) {
        return None;
    }
    let args = node.child_by_field_name("arguments")?;
    let mut cursor = args.walk();
    let first = args.named_children(&mut cursor).next()?;
    let key = string_literal(&first, source)?;
    Some(ExtractedKey {
        key,
        line: first.start_position().row + 1,
        usage: KeyUsage::Access,
    })
}

/// Walk up to find the nearest enclosing function_definition.
fn find_enclosing_function(node: &Node, source: &[u8]) -> Option<String> {
    let mut current = node.parent();
    while let Some(n) = current {
        if n.kind() == "function_definition" {
            let name_node = n.child_by_field_name("name")?;
            return Some(node_text(&name_node, source));
        }
        current = n.parent();
    }
    None
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn node_text(node: &Node, source: &[u8]) -> String {
    node.utf8_text(source).unwrap_or("").to_string()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Value of a plain string literal. f-strings with interpolation and
/// implicit concatenations are not literal keys.
fn string_literal(node: &Node, source: &[u8]) -> Option<String> {
    if node.kind() != "string" {
        return None;
    }
    let mut value = String::new();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "string_content" | "escape_sequence" => value.push_str(child.utf8_text(source).ok()?),
            "interpolation" => return None,
            _ => {}
        }
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_qualifies_nested_names() {
        let scope = Scope::module().enter(ScopeKind::Class, "Outer");
        let inner = scope.enter(ScopeKind::Class, "Inner");
        assert_eq!(inner.qualify("run"), "Outer.Inner.run");
        assert_eq!(inner.parent().as_deref(), Some("Inner"));
        assert_eq!(Scope::module().parent(), None);
    }

    #[test]
    fn collapse_whitespace_joins_lines() {
        assert_eq!(collapse_whitespace("def f(\n    a,\n    b)"), "def f( a, b)");
    }
}

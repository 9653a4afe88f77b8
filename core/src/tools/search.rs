use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{parse_params, ParamSpec, ParamType, Tool, ToolContext, ToolOutput, ToolSpec};
use crate::error::ToolError;
use crate::graph::{search_module, ImportGraph};
use crate::investigation::Phase;

/// Matches returned to the oracle per query.
const MAX_MATCHES: usize = 20;

// ---------------------------------------------------------------------------
// Parameter structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct SearchSymbolParams {
    /// Function, class, method or variable name
    pub name: String,
    /// Fall back to similar names when there is no exact match (default true)
    pub fuzzy: Option<bool>,
    /// File the name was seen in; ranks nearby definitions first
    pub context_file: Option<String>,
}

#[derive(Deserialize)]
pub struct GetCallersParams {
    /// Function or method name (last segment of dotted names is used)
    pub name: String,
}

#[derive(Deserialize)]
pub struct SearchLiteralKeyParams {
    /// Mapping key as used in a subscript or dict literal
    pub key: String,
    /// Fall back to similar keys when there is no exact match (default true)
    pub fuzzy: Option<bool>,
}

#[derive(Deserialize)]
pub struct SearchModuleParams {
    /// Dotted module path as written in the import
    pub module: String,
    /// Consider near-miss module names (default true)
    pub fuzzy: Option<bool>,
}

// ---------------------------------------------------------------------------
// search_symbol
// ---------------------------------------------------------------------------

pub struct SearchSymbolTool;

#[async_trait]
impl Tool for SearchSymbolTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "search_symbol",
            description: "Find where a function, class, method or variable is defined. \
                          Exact matches first; with fuzzy=true, similar names ranked by \
                          similarity then proximity to context_file.",
            params: vec![
                ParamSpec::required("name", ParamType::String, "Symbol name"),
                ParamSpec::optional("fuzzy", ParamType::Boolean, "Allow similar names (default true)"),
                ParamSpec::optional("context_file", ParamType::String, "File the name was seen in"),
            ],
            phases: Vec::new(),
        }
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: Map<String, Value>,
    ) -> Result<ToolOutput, ToolError> {
        let params: SearchSymbolParams = parse_params("search_symbol", args)?;
        let name = params.name.trim();
        if name.is_empty() {
            return Err(ToolError::validation("search_symbol: name must not be empty"));
        }

        let matches = ctx.index.search_symbol(
            name,
            params.fuzzy.unwrap_or(true),
            params.context_file.as_deref(),
            ctx.config.index.fuzzy_floor,
        );
        if matches.is_empty() {
            return Err(ToolError::not_found(format!("no symbol matching `{name}`")));
        }

        let total = matches.len();
        let exact = matches.first().map(|m| m.exact).unwrap_or(false);
        let shown: Vec<Value> = matches
            .into_iter()
            .take(MAX_MATCHES)
            .map(|m| {
                json!({
                    "name": m.symbol.name,
                    "kind": m.symbol.kind,
                    "file": m.symbol.file,
                    "line": m.symbol.start_line,
                    "end_line": m.symbol.end_line,
                    "parent": m.symbol.parent,
                    "signature": m.symbol.signature.as_ref().map(|s| s.text.clone()),
                    "similarity": (m.similarity * 100.0).round() / 100.0,
                    "reachability": m.reachability,
                })
            })
            .collect();

        Ok(ToolOutput::new(json!({
            "query": name,
            "exact": exact,
            "total": total,
            "matches": shown,
        })))
    }
}

// ---------------------------------------------------------------------------
// get_callers
// ---------------------------------------------------------------------------

pub struct GetCallersTool;

#[async_trait]
impl Tool for GetCallersTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "get_callers",
            description: "List call sites of a function or method: calling function, file and line.",
            params: vec![ParamSpec::required("name", ParamType::String, "Function or method name")],
            phases: Vec::new(),
        }
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: Map<String, Value>,
    ) -> Result<ToolOutput, ToolError> {
        let params: GetCallersParams = parse_params("get_callers", args)?;
        let callers = ctx.index.callers(params.name.trim());

        let mut warnings = Vec::new();
        if callers.is_empty() {
            warnings.push(format!("no call sites found for `{}`", params.name));
        }
        Ok(ToolOutput::with_warnings(
            json!({
                "name": params.name,
                "callers": callers,
            }),
            warnings,
        ))
    }
}

// ---------------------------------------------------------------------------
// search_literal_key
// ---------------------------------------------------------------------------

pub struct SearchLiteralKeyTool;

#[async_trait]
impl Tool for SearchLiteralKeyTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "search_literal_key",
            description: "Look up a mapping key (for KeyError): where it is built or read, \
                          similar keys, and functions whose returned dict holds it nested, \
                          restructured or misspelled.",
            params: vec![
                ParamSpec::required("key", ParamType::String, "Mapping key"),
                ParamSpec::optional("fuzzy", ParamType::Boolean, "Allow similar keys (default true)"),
            ],
            phases: vec![Phase::Analyze],
        }
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: Map<String, Value>,
    ) -> Result<ToolOutput, ToolError> {
        let params: SearchLiteralKeyParams = parse_params("search_literal_key", args)?;
        let key = params.key.as_str();

        let matches = ctx.index.search_literal_key(
            key,
            params.fuzzy.unwrap_or(true),
            ctx.config.index.key_fuzzy_floor,
        );
        let origins = ctx.index.key_origins(key);
        if matches.is_empty() && origins.is_empty() {
            return Err(ToolError::not_found(format!("no literal key matching `{key}`")));
        }

        let origins: Vec<Value> = origins
            .into_iter()
            .take(MAX_MATCHES)
            .map(|o| {
                json!({
                    "kind": o.kind,
                    "function": o.function,
                    "file": o.file,
                    "line": o.line,
                    "access_path": o.access_path(),
                    "confidence": o.confidence,
                })
            })
            .collect();

        Ok(ToolOutput::new(json!({
            "key": key,
            "matches": matches.into_iter().take(MAX_MATCHES).collect::<Vec<_>>(),
            "origins": origins,
        })))
    }
}

// ---------------------------------------------------------------------------
// search_module
// ---------------------------------------------------------------------------

pub struct SearchModuleTool;

#[async_trait]
impl Tool for SearchModuleTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "search_module",
            description: "Find the project file for a dotted module path (for ImportError / \
                          ModuleNotFoundError), including modules moved under a new package \
                          or missing an intermediate package.",
            params: vec![
                ParamSpec::required("module", ParamType::String, "Dotted module path"),
                ParamSpec::optional("fuzzy", ParamType::Boolean, "Allow near-miss names (default true)"),
            ],
            phases: Vec::new(),
        }
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: Map<String, Value>,
    ) -> Result<ToolOutput, ToolError> {
        let params: SearchModuleParams = parse_params("search_module", args)?;
        let matches = search_module(
            &ctx.index,
            params.module.trim(),
            params.fuzzy.unwrap_or(true),
            ctx.config.index.fuzzy_floor,
        );
        if matches.is_empty() {
            return Err(ToolError::not_found(format!(
                "no project module matching `{}`; it may be third-party or standard library",
                params.module
            )));
        }
        Ok(ToolOutput::new(json!({
            "module": params.module,
            "matches": matches.into_iter().take(MAX_MATCHES).collect::<Vec<_>>(),
        })))
    }
}

// ---------------------------------------------------------------------------
// find_import_cycles
// ---------------------------------------------------------------------------

pub struct FindImportCyclesTool;

#[async_trait]
impl Tool for FindImportCyclesTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "find_import_cycles",
            description: "List circular imports between project files. Cycles that only \
                          exist through conditional imports are flagged.",
            params: Vec::new(),
            phases: vec![Phase::Analyze],
        }
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        _args: Map<String, Value>,
    ) -> Result<ToolOutput, ToolError> {
        let cycles = ImportGraph::from_snapshot(&ctx.index).cycles();
        Ok(ToolOutput::new(json!({
            "count": cycles.len(),
            "cycles": cycles,
        })))
    }
}

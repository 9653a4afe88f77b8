//! Read-only inspection tools the investigation loop dispatches by name.

pub mod control;
pub mod files;
pub mod search;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::Config;
use crate::error::{ErrorKind, ToolError};
use crate::index::IndexSnapshot;
use crate::investigation::Phase;

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
            ParamType::Array => value.is_array(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub ty: ParamType,
    pub required: bool,
    pub description: &'static str,
}

impl ParamSpec {
    pub fn required(name: &'static str, ty: ParamType, description: &'static str) -> Self {
        Self {
            name,
            ty,
            required: true,
            description,
        }
    }

    pub fn optional(name: &'static str, ty: ParamType, description: &'static str) -> Self {
        Self {
            name,
            ty,
            required: false,
            description,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
    /// Phases the tool is meant for. Empty means any. Advisory only.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub phases: Vec<Phase>,
}

impl ToolSpec {
    /// Check object shape, required fields and JSON types. `null` counts as
    /// absent.
    pub fn validate(&self, args: Value) -> Result<Map<String, Value>, ToolError> {
        let mut map = match args {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ToolError::validation(format!(
                    "{}: arguments must be a JSON object, got {}",
                    self.name,
                    json_type_name(&other)
                )))
            }
        };
        map.retain(|_, v| !v.is_null());

        for param in &self.params {
            match map.get(param.name) {
                None if param.required => {
                    return Err(ToolError::validation(format!(
                        "{}: missing required parameter `{}`",
                        self.name, param.name
                    )))
                }
                None => {}
                Some(value) if !param.ty.matches(value) => {
                    return Err(ToolError::validation(format!(
                        "{}: parameter `{}` must be {}, got {}",
                        self.name,
                        param.name,
                        param.ty.as_str(),
                        json_type_name(value)
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(map)
    }

    /// OpenAI-style function definition.
    pub fn function_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.params {
            properties.insert(
                param.name.to_string(),
                json!({
                    "type": param.ty.as_str(),
                    "description": param.description,
                }),
            );
            if param.required {
                required.push(param.name);
            }
        }
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                },
            },
        })
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Deserialize validated arguments into a tool's parameter struct.
pub fn parse_params<T: DeserializeOwned>(
    tool: &str,
    args: Map<String, Value>,
) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(args))
        .map_err(|e| ToolError::validation(format!("{tool}: {e}")))
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub data: Value,
    pub warnings: Vec<String>,
}

impl ToolOutput {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(data: Value, warnings: Vec<String>) -> Self {
        Self { data, warnings }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    Success {
        data: Value,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
    Failure {
        kind: ErrorKind,
        message: String,
    },
}

impl ToolResult {
    pub fn failure(err: ToolError) -> Self {
        ToolResult::Failure {
            kind: err.kind,
            message: err.message,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolResult::Success { .. })
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            ToolResult::Success { data, .. } => Some(data),
            ToolResult::Failure { .. } => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ToolResult::Success { .. } => None,
            ToolResult::Failure { kind, .. } => Some(*kind),
        }
    }
}

impl From<Result<ToolOutput, ToolError>> for ToolResult {
    fn from(result: Result<ToolOutput, ToolError>) -> Self {
        match result {
            Ok(out) => ToolResult::Success {
                data: out.data,
                warnings: out.warnings,
            },
            Err(err) => ToolResult::failure(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool trait + context
// ---------------------------------------------------------------------------

/// Everything a tool body may read. Cheap to clone; the snapshot is pinned
/// for the whole call.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub index: Arc<IndexSnapshot>,
    pub root: PathBuf,
    pub config: Arc<Config>,
    pub phase: Phase,
}

impl ToolContext {
    pub fn new(index: Arc<IndexSnapshot>, config: Arc<Config>) -> Self {
        Self {
            root: index.root.clone(),
            index,
            config,
            phase: Phase::Explore,
        }
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    /// Run with arguments that already passed [`ToolSpec::validate`].
    async fn execute(
        &self,
        ctx: &ToolContext,
        args: Map<String, Value>,
    ) -> Result<ToolOutput, ToolError>;
}

// ---------------------------------------------------------------------------
// ToolRegistry
// ---------------------------------------------------------------------------

pub struct ToolRegistry {
    tools: BTreeMap<String, (ToolSpec, Arc<dyn Tool>)>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Registry with every built-in tool.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(search::SearchSymbolTool));
        registry.register(Arc::new(search::GetCallersTool));
        registry.register(Arc::new(search::SearchLiteralKeyTool));
        registry.register(Arc::new(search::SearchModuleTool));
        registry.register(Arc::new(search::FindImportCyclesTool));
        registry.register(Arc::new(files::ReadFileTool));
        registry.register(Arc::new(files::GrepTool));
        registry.register(Arc::new(control::SetPhaseTool));
        registry.register(Arc::new(control::CompleteInvestigationTool));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let spec = tool.spec();
        self.tools.insert(spec.name.to_string(), (spec, tool));
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(&canonical_tool_name(name)).map(|(spec, _)| spec)
    }

    pub fn schemas(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|(spec, _)| spec.function_schema())
            .collect()
    }

    /// Validate and run one tool call. Never panics and never returns an
    /// error: every failure comes back as a classified `ToolResult::Failure`.
    pub async fn execute(&self, ctx: &ToolContext, name: &str, args: Value) -> ToolResult {
        let canonical = canonical_tool_name(name);
        let Some((spec, tool)) = self.tools.get(&canonical) else {
            tracing::debug!(tool = name, "unknown tool requested");
            return ToolResult::failure(ToolError::validation(format!(
                "unknown tool `{name}`; available tools: {}",
                self.names().join(", ")
            )));
        };

        let args = match spec.validate(args) {
            Ok(a) => a,
            Err(err) => return ToolResult::failure(err),
        };

        let mut advisory = Vec::new();
        if !spec.phases.is_empty() && !spec.phases.contains(&ctx.phase) {
            advisory.push(format!(
                "{} is intended for the {} phase; current phase is {}",
                spec.name,
                spec.phases
                    .iter()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join("/"),
                ctx.phase.as_str()
            ));
        }

        let timeout = ctx.config.investigation.tool_timeout();
        let task_tool = Arc::clone(tool);
        let task_ctx = ctx.clone();
        let mut handle =
            tokio::spawn(async move { task_tool.execute(&task_ctx, args).await });

        let result = match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) if join_err.is_panic() => {
                tracing::warn!(tool = spec.name, "tool body panicked");
                Err(ToolError::internal(format!("{} panicked", spec.name)))
            }
            Ok(Err(join_err)) => Err(ToolError::internal(format!(
                "{} was cancelled: {join_err}",
                spec.name
            ))),
            Err(_) => {
                handle.abort();
                tracing::warn!(tool = spec.name, timeout_ms = timeout.as_millis() as u64, "tool timed out");
                Err(ToolError::new(
                    ErrorKind::Timeout,
                    format!("{} exceeded {} ms", spec.name, timeout.as_millis()),
                ))
            }
        };

        let mut result = ToolResult::from(result);
        if let ToolResult::Success { warnings, .. } = &mut result {
            advisory.append(warnings);
            *warnings = advisory;
        }
        tracing::debug!(tool = spec.name, success = result.is_success(), "tool executed");
        result
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// `SearchSymbol` / `searchSymbol` / `search-symbol` -> `search_symbol`.
pub fn canonical_tool_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.trim().chars() {
        if ch == '-' || ch == ' ' {
            out.push('_');
            prev_lower = false;
        } else if ch.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

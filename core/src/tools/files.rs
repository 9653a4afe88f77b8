use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{parse_params, ParamSpec, ParamType, Tool, ToolContext, ToolOutput, ToolSpec};
use crate::error::{ErrorKind, ToolError};
use crate::grammar::GrammarRegistry;
use crate::scanner::{relative_path, SourceScanner};

// ---------------------------------------------------------------------------
// Path resolution
// ---------------------------------------------------------------------------

/// Resolve a caller-supplied path to an existing file or directory inside
/// the project root. Returns the canonical absolute path and the
/// root-relative form (empty for the root itself).
pub fn resolve_in_root(root: &Path, raw: &str) -> Result<(PathBuf, String), ToolError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "." {
        return Ok((root.to_path_buf(), String::new()));
    }

    // Callers often repeat the project directory name: `myproj/pkg/a.py`.
    let mut normalized = trimmed.trim_start_matches("./");
    if let Some(name) = root.file_name().and_then(|n| n.to_str()) {
        if let Some(rest) = normalized.strip_prefix(&format!("{name}/")) {
            if !root.join(normalized).exists() {
                normalized = rest;
            }
        }
    }

    let candidate = Path::new(normalized);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };

    let canonical = joined
        .canonicalize()
        .map_err(|e| ToolError::io(&format!("cannot open {raw}"), &e))?;
    if !canonical.starts_with(root) {
        return Err(ToolError::new(
            ErrorKind::Permission,
            format!("{raw} is outside the project root"),
        ));
    }
    let rel = relative_path(root, &canonical).unwrap_or_default();
    Ok((canonical, rel))
}

// ---------------------------------------------------------------------------
// read_file
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ReadFileParams {
    /// Path relative to the project root
    pub path: String,
    /// First line, 1-based (default 1)
    pub start_line: Option<i64>,
    /// Last line, inclusive (default end of file)
    pub end_line: Option<i64>,
}

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "read_file",
            description: "Read a file, optionally a line range. Returns numbered lines. \
                          Out-of-range line numbers are clamped with a warning.",
            params: vec![
                ParamSpec::required("path", ParamType::String, "File path relative to the project root"),
                ParamSpec::optional("start_line", ParamType::Integer, "First line, 1-based (default 1)"),
                ParamSpec::optional("end_line", ParamType::Integer, "Last line, inclusive (default end of file)"),
            ],
            phases: Vec::new(),
        }
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: Map<String, Value>,
    ) -> Result<ToolOutput, ToolError> {
        let params: ReadFileParams = parse_params("read_file", args)?;
        let (abs, rel) = resolve_in_root(&ctx.root, &params.path)?;
        if abs.is_dir() {
            return Err(ToolError::validation(format!("{} is a directory", params.path)));
        }

        let bytes = tokio::fs::read(&abs)
            .await
            .map_err(|e| ToolError::io(&format!("cannot read {}", params.path), &e))?;
        let text = String::from_utf8(bytes).map_err(|_| {
            ToolError::new(ErrorKind::ParseError, format!("{} is not valid UTF-8", params.path))
        })?;

        let lines: Vec<&str> = text.lines().collect();
        let range = clamp_range(lines.len(), params.start_line, params.end_line);

        let content = match range.span {
            Some((start, end)) => lines[start - 1..end]
                .iter()
                .enumerate()
                .map(|(i, line)| format!("{:4}: {line}", start + i))
                .collect::<Vec<_>>()
                .join("\n"),
            None => String::new(),
        };
        let (start_line, end_line) = range.span.unwrap_or((0, 0));

        Ok(ToolOutput::with_warnings(
            json!({
                "path": rel,
                "start_line": start_line,
                "end_line": end_line,
                "total_lines": lines.len(),
                "content": content,
            }),
            range.warnings,
        ))
    }
}

struct ClampedRange {
    /// Inclusive 1-based span, `None` for an empty file.
    span: Option<(usize, usize)>,
    warnings: Vec<String>,
}

fn clamp_range(total: usize, start: Option<i64>, end: Option<i64>) -> ClampedRange {
    let mut warnings = Vec::new();
    if total == 0 {
        warnings.push("file is empty".to_string());
        return ClampedRange {
            span: None,
            warnings,
        };
    }
    let last = total as i64;

    let mut start_line = start.unwrap_or(1);
    if start_line < 1 {
        warnings.push(format!("start_line {start_line} clamped to 1"));
        start_line = 1;
    } else if start_line > last {
        warnings.push(format!(
            "start_line {start_line} is past the end of the file ({total} lines), clamped to {total}"
        ));
        start_line = last;
    }

    let mut end_line = end.unwrap_or(last);
    if end_line > last {
        warnings.push(format!("end_line {end_line} clamped to {total}"));
        end_line = last;
    }
    if end_line < start_line {
        warnings.push(format!(
            "end_line {end_line} is before start_line {start_line}, clamped to {start_line}"
        ));
        end_line = start_line;
    }

    ClampedRange {
        span: Some((start_line as usize, end_line as usize)),
        warnings,
    }
}

// ---------------------------------------------------------------------------
// grep
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct GrepParams {
    /// Text or regular expression to search for
    pub pattern: String,
    /// Directory or file to search, relative to the root (default whole project)
    pub path: Option<String>,
    /// Treat the pattern as a regular expression (default false)
    pub use_regex: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GrepMatch {
    pub file: String,
    pub line: usize,
    pub content: String,
}

enum Matcher {
    Regex(Regex),
    Literal(String),
}

impl Matcher {
    fn is_match(&self, line: &str) -> bool {
        match self {
            Matcher::Regex(re) => re.is_match(line),
            Matcher::Literal(needle) => line.contains(needle.as_str()),
        }
    }

    fn mode(&self) -> &'static str {
        match self {
            Matcher::Regex(_) => "regex",
            Matcher::Literal(_) => "literal",
        }
    }
}

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "grep",
            description: "Search source files for a literal string or regular expression. \
                          Returns file, line and matching line. An invalid regex falls back \
                          to a literal search.",
            params: vec![
                ParamSpec::required("pattern", ParamType::String, "Text or regular expression"),
                ParamSpec::optional("path", ParamType::String, "Directory or file to search (default whole project)"),
                ParamSpec::optional("use_regex", ParamType::Boolean, "Treat pattern as a regular expression (default false)"),
            ],
            phases: Vec::new(),
        }
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: Map<String, Value>,
    ) -> Result<ToolOutput, ToolError> {
        let params: GrepParams = parse_params("grep", args)?;
        if params.pattern.is_empty() {
            return Err(ToolError::validation("grep: pattern must not be empty"));
        }

        let mut warnings = Vec::new();
        let matcher = if params.use_regex.unwrap_or(false) {
            match Regex::new(&params.pattern) {
                Ok(re) => Matcher::Regex(re),
                Err(err) => {
                    warnings.push(format!(
                        "invalid regex ({err}); searched for the literal string instead"
                    ));
                    Matcher::Literal(params.pattern.clone())
                }
            }
        } else {
            Matcher::Literal(params.pattern.clone())
        };

        let (_, scope) = resolve_in_root(&ctx.root, params.path.as_deref().unwrap_or("."))?;
        let root = ctx.root.clone();
        let index_config = ctx.config.index.clone();
        let max_results = ctx.config.investigation.grep_max_results;
        let timeout = ctx.config.investigation.grep_timeout();

        let search = tokio::task::spawn_blocking(move || {
            let deadline = Instant::now() + timeout;
            let scanner = SourceScanner::new(&index_config, &GrammarRegistry::new());
            let mut matches = Vec::new();

            for file in scanner.scan(&root) {
                if !in_scope(&file.rel_path, &scope) {
                    continue;
                }
                if Instant::now() >= deadline {
                    return Err(ToolError::new(
                        ErrorKind::Timeout,
                        format!(
                            "grep exceeded {} ms after {} matches",
                            timeout.as_millis(),
                            matches.len()
                        ),
                    ));
                }
                let Ok(text) = std::fs::read_to_string(&file.abs_path) else {
                    continue;
                };
                for (i, line) in text.lines().enumerate() {
                    if matcher.is_match(line) {
                        matches.push(GrepMatch {
                            file: file.rel_path.clone(),
                            line: i + 1,
                            content: line.trim().to_string(),
                        });
                        if matches.len() >= max_results {
                            return Ok((matches, true, matcher.mode()));
                        }
                    }
                }
            }
            Ok((matches, false, matcher.mode()))
        });

        let (matches, truncated, mode) = search
            .await
            .map_err(|e| ToolError::internal(format!("grep task failed: {e}")))??;

        if truncated {
            warnings.push(format!("results truncated at {max_results} matches"));
        }
        Ok(ToolOutput::with_warnings(
            json!({
                "pattern": params.pattern,
                "mode": mode,
                "truncated": truncated,
                "matches": matches,
            }),
            warnings,
        ))
    }
}

fn in_scope(rel_path: &str, scope: &str) -> bool {
    scope.is_empty()
        || rel_path == scope
        || rel_path
            .strip_prefix(scope)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_handles_out_of_range() {
        let r = clamp_range(10, Some(0), Some(50));
        assert_eq!(r.span, Some((1, 10)));
        assert_eq!(r.warnings.len(), 2);

        let r = clamp_range(10, Some(20), None);
        assert_eq!(r.span, Some((10, 10)));
        assert_eq!(r.warnings.len(), 1);

        let r = clamp_range(10, Some(5), Some(3));
        assert_eq!(r.span, Some((5, 5)));

        let r = clamp_range(10, None, None);
        assert_eq!(r.span, Some((1, 10)));
        assert!(r.warnings.is_empty());

        assert_eq!(clamp_range(0, None, None).span, None);
    }

    #[test]
    fn scope_matches_directory_prefixes() {
        assert!(in_scope("pkg/a.py", ""));
        assert!(in_scope("pkg/a.py", "pkg"));
        assert!(in_scope("pkg/a.py", "pkg/a.py"));
        assert!(!in_scope("pkgx/a.py", "pkg"));
    }
}

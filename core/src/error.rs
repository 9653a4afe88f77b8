//! Error taxonomy shared by the tool layer, the orchestrator and the retry
//! layer.
//!
//! Infrastructure paths (scanning, snapshot I/O, the CLI) use `anyhow` with
//! context. The types here exist where a failure has to be *classified* and
//! handed back as data rather than propagated.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// ErrorKind: classification attached to every failed tool result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad caller input: unknown tool, schema mismatch, invalid value.
    Validation,
    /// Missing file or symbol.
    NotFound,
    /// Filesystem access denied, or a path escaping the project root.
    Permission,
    /// A tool or oracle call exceeded its bound.
    Timeout,
    /// Malformed source or malformed oracle output.
    ParseError,
    /// Oracle transport failure.
    Network,
    /// Unexpected failure inside a tool body.
    Internal,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Permission => "permission",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::Network => "network",
            ErrorKind::Internal => "internal",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Map an I/O error onto the taxonomy.
    pub fn from_io(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::Permission,
            std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
            std::io::ErrorKind::InvalidData => ErrorKind::ParseError,
            std::io::ErrorKind::InvalidInput => ErrorKind::Validation,
            _ => ErrorKind::Unknown,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ToolError
// ---------------------------------------------------------------------------

/// A classified failure produced by a tool body or by argument validation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("[{kind}] {message}")]
pub struct ToolError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn io(context: &str, err: &std::io::Error) -> Self {
        Self::new(ErrorKind::from_io(err), format!("{context}: {err}"))
    }
}

// ---------------------------------------------------------------------------
// OracleError
// ---------------------------------------------------------------------------

/// Failure of a single reasoning-oracle call. All variants are retried by the
/// orchestrator up to its configured bound.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("oracle transport failure: {0}")]
    Network(String),

    #[error("oracle call timed out after {0} ms")]
    Timeout(u64),

    #[error("malformed oracle output: {0}")]
    MalformedOutput(String),
}

impl OracleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OracleError::Network(_) => ErrorKind::Network,
            OracleError::Timeout(_) => ErrorKind::Timeout,
            OracleError::MalformedOutput(_) => ErrorKind::ParseError,
        }
    }
}

// ---------------------------------------------------------------------------
// AttemptError
// ---------------------------------------------------------------------------

/// Malformed attempt data handed to the retry layer. This is a caller bug and
/// is surfaced immediately instead of being folded into the history.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    #[error("invalid attempt: {0}")]
    Validation(String),
}

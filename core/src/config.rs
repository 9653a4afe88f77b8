use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File name looked up at the project root by [`Config::discover`].
pub const CONFIG_FILE_NAME: &str = "sleuth.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// Config sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub index: IndexConfig,
    pub investigation: InvestigationConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Directory names skipped anywhere in the tree.
    pub ignore_dirs: Vec<String>,
    /// Files larger than this are tracked as unreadable instead of parsed.
    pub max_file_size: u64,
    /// Where snapshots are persisted. `None` resolves to the user cache dir.
    pub cache_dir: Option<PathBuf>,
    /// Minimum normalized similarity for fuzzy symbol matches.
    pub fuzzy_floor: f64,
    /// Minimum normalized similarity for fuzzy literal-key matches.
    pub key_fuzzy_floor: f64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            ignore_dirs: [
                ".git",
                ".svn",
                ".venv",
                "venv",
                "env",
                "__pycache__",
                ".pytest_cache",
                ".mypy_cache",
                "node_modules",
                "dist",
                "build",
                ".idea",
                ".vscode",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_file_size: 1024 * 1024, // 1 MiB
            cache_dir: None,
            fuzzy_floor: 0.6,
            key_fuzzy_floor: 0.7,
        }
    }
}

impl IndexConfig {
    /// Resolved snapshot directory: the configured one, else `~/.cache/sleuth`,
    /// else a `.sleuth` directory under the system temp dir.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        if let Some(dir) = &self.cache_dir {
            return dir.clone();
        }
        dirs::cache_dir()
            .map(|d| d.join("sleuth"))
            .unwrap_or_else(|| std::env::temp_dir().join(".sleuth"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvestigationConfig {
    pub iteration_cap: usize,
    pub oracle_timeout_ms: u64,
    /// Retries after the first failed oracle call.
    pub oracle_max_retries: u32,
    /// Initial backoff; doubles on every retry.
    pub oracle_backoff_ms: u64,
    pub tool_timeout_ms: u64,
    pub grep_timeout_ms: u64,
    pub grep_max_results: usize,
    pub min_phase_reason_len: usize,
}

impl Default for InvestigationConfig {
    fn default() -> Self {
        Self {
            iteration_cap: 8,
            oracle_timeout_ms: 60_000,
            oracle_max_retries: 2,
            oracle_backoff_ms: 500,
            tool_timeout_ms: 15_000,
            grep_timeout_ms: 10_000,
            grep_max_results: 50,
            min_phase_reason_len: 10,
        }
    }
}

impl InvestigationConfig {
    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }

    pub fn oracle_backoff(&self) -> Duration {
        Duration::from_millis(self.oracle_backoff_ms)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }

    pub fn grep_timeout(&self) -> Duration {
        Duration::from_millis(self.grep_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// How many previous attempts a repeated code fingerprint is checked against.
    pub similar_code_window: usize,
    /// Consecutive identical failures that count as an error loop.
    pub same_error_threshold: usize,
    /// Hard ceiling on recorded attempts.
    pub max_attempts: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            similar_code_window: 3,
            same_error_threshold: 3,
            max_attempts: 8,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }

    /// Load `<root>/sleuth.toml` if it exists, otherwise return defaults.
    pub fn discover(root: &Path) -> Result<Self, ConfigError> {
        let candidate = root.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            tracing::debug!(path = %candidate.display(), "loading config");
            Self::load(&candidate)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(field: &'static str, value: usize) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".into(),
                });
            }
            Ok(())
        }
        fn floor(field: &'static str, value: f64) -> Result<(), ConfigError> {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be in (0, 1], got {value}"),
                });
            }
            Ok(())
        }

        positive("investigation.iteration_cap", self.investigation.iteration_cap)?;
        positive("investigation.grep_max_results", self.investigation.grep_max_results)?;
        positive("retry.similar_code_window", self.retry.similar_code_window)?;
        positive("retry.same_error_threshold", self.retry.same_error_threshold)?;
        positive("retry.max_attempts", self.retry.max_attempts)?;
        floor("index.fuzzy_floor", self.index.fuzzy_floor)?;
        floor("index.key_fuzzy_floor", self.index.key_fuzzy_floor)?;
        Ok(())
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::ToolResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Explore,
    Analyze,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Explore => "EXPLORE",
            Phase::Analyze => "ANALYZE",
        }
    }

    /// Case-insensitive.
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_uppercase().as_str() {
            "EXPLORE" => Some(Phase::Explore),
            "ANALYZE" | "ANALYSE" => Some(Phase::Analyze),
            _ => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The runtime error under investigation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Exception class, e.g. `NameError`.
    pub error_type: String,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
    /// Source of the failing file, when the caller has it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorContext {
    pub fn new(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            error_message: error_message.into(),
            ..Default::default()
        }
    }

    pub fn at(mut self, file: impl Into<String>, line: usize) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub iteration: usize,
    pub phase: Phase,
    pub tool: String,
    pub arguments: Value,
    pub result: ToolResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub iteration: usize,
    pub from: Phase,
    pub to: Phase,
    pub reason: String,
}

/// Everything the oracle sees. Observations are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub incident: ErrorContext,
    pub phase: Phase,
    /// 1-based number of the iteration about to run.
    pub iteration: usize,
    pub iteration_cap: usize,
    observations: Vec<Observation>,
    phase_log: Vec<PhaseTransition>,
}

impl Transcript {
    pub fn new(incident: ErrorContext, phase: Phase, iteration_cap: usize) -> Self {
        Self {
            incident,
            phase,
            iteration: 1,
            iteration_cap,
            observations: Vec::new(),
            phase_log: Vec::new(),
        }
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn phase_log(&self) -> &[PhaseTransition] {
        &self.phase_log
    }

    pub fn record(&mut self, tool: &str, arguments: Value, result: ToolResult) -> &Observation {
        self.observations.push(Observation {
            iteration: self.iteration,
            phase: self.phase,
            tool: tool.to_string(),
            arguments,
            result,
        });
        let last = self.observations.len() - 1;
        &self.observations[last]
    }

    pub fn transition(&mut self, to: Phase, reason: &str) {
        self.phase_log.push(PhaseTransition {
            iteration: self.iteration,
            from: self.phase,
            to,
            reason: reason.to_string(),
        });
        self.phase = to;
    }

    /// One line per observation, for reports and logs.
    pub fn trace(&self) -> Vec<String> {
        self.observations
            .iter()
            .map(|o| {
                let outcome = match &o.result {
                    ToolResult::Success { .. } => "ok".to_string(),
                    ToolResult::Failure { kind, .. } => format!("failed ({kind})"),
                };
                format!("#{} [{}] {}({}) -> {outcome}", o.iteration, o.phase, o.tool, o.arguments)
            })
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

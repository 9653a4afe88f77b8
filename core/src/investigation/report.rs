use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::transcript::{PhaseTransition, Transcript};
use crate::error::ToolError;
use crate::tools::ToolResult;

/// Minimum length of a report summary, in characters.
pub const MIN_SUMMARY_LEN: usize = 10;

/// Cap on locations salvaged from observations for a degraded report.
const MAX_SALVAGED_LOCATIONS: usize = 5;

// ---------------------------------------------------------------------------
// Report submitted by the oracle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportLocation {
    #[serde(alias = "file")]
    pub file_path: String,
    pub line: usize,
    pub symbol: String,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_snippet: Option<String>,
}

/// Shape `complete_investigation` accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDraft {
    pub summary: String,
    pub relevant_locations: Vec<ReportLocation>,
    pub root_cause: String,
    pub suggested_fix: String,
    pub confidence: f64,
    #[serde(default)]
    pub exploration_trace: Vec<String>,
}

impl ReportDraft {
    /// Deserialize and check field constraints.
    pub fn parse(value: &Value) -> Result<Self, ToolError> {
        if !value.is_object() {
            return Err(ToolError::validation("report must be a JSON object"));
        }
        let draft: ReportDraft = serde_json::from_value(value.clone())
            .map_err(|e| ToolError::validation(format!("malformed report: {e}")))?;
        draft.validate()?;
        Ok(draft)
    }

    pub fn validate(&self) -> Result<(), ToolError> {
        let mut problems = Vec::new();
        if self.summary.trim().chars().count() < MIN_SUMMARY_LEN {
            problems.push(format!("summary must be at least {MIN_SUMMARY_LEN} characters"));
        }
        if self.relevant_locations.is_empty() {
            problems.push("relevant_locations must list at least one location".to_string());
        }
        for (i, loc) in self.relevant_locations.iter().enumerate() {
            if loc.file_path.trim().is_empty() {
                problems.push(format!("relevant_locations[{i}].file_path is empty"));
            }
            if loc.line == 0 {
                problems.push(format!("relevant_locations[{i}].line must be 1-based"));
            }
        }
        if self.root_cause.trim().is_empty() {
            problems.push("root_cause is empty".to_string());
        }
        if self.suggested_fix.trim().is_empty() {
            problems.push("suggested_fix is empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            problems.push(format!("confidence {} is outside [0, 1]", self.confidence));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ToolError::validation(format!(
                "invalid report: {}",
                problems.join("; ")
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Terminal report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    IterationCapReached,
    /// The oracle kept failing.
    Inconclusive,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationReport {
    pub outcome: Outcome,
    pub confidence: f64,
    pub locations: Vec<ReportLocation>,
    /// Narrative.
    pub summary: String,
    pub root_cause: String,
    /// Recommended fix strategy.
    pub suggested_fix: String,
    pub trace: Vec<String>,
    pub phase_log: Vec<PhaseTransition>,
    pub iterations: usize,
}

impl InvestigationReport {
    pub fn completed(draft: ReportDraft, transcript: &Transcript) -> Self {
        let mut trace = draft.exploration_trace;
        if trace.is_empty() {
            trace = transcript.trace();
        }
        Self {
            outcome: Outcome::Completed,
            confidence: draft.confidence,
            locations: draft.relevant_locations,
            summary: draft.summary,
            root_cause: draft.root_cause,
            suggested_fix: draft.suggested_fix,
            trace,
            phase_log: transcript.phase_log().to_vec(),
            iterations: transcript.iteration,
        }
    }

    /// Confidence-0 report for any abnormal ending. Carries whatever
    /// locations the observations point at.
    pub fn degraded(outcome: Outcome, narrative: String, transcript: &Transcript, iterations: usize) -> Self {
        Self {
            outcome,
            confidence: 0.0,
            locations: salvage_locations(transcript),
            summary: narrative,
            root_cause: String::new(),
            suggested_fix: String::new(),
            trace: transcript.trace(),
            phase_log: transcript.phase_log().to_vec(),
            iterations,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == Outcome::Completed
    }
}

/// Best-effort locations from successful symbol lookups, caller lookups and
/// file reads, in the order they were observed.
fn salvage_locations(transcript: &Transcript) -> Vec<ReportLocation> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    let mut push = |file: &str, line: usize, symbol: &str, reasoning: String| {
        if out.len() >= MAX_SALVAGED_LOCATIONS || file.is_empty() || line == 0 {
            return;
        }
        if seen.insert((file.to_string(), line)) {
            out.push(ReportLocation {
                file_path: file.to_string(),
                line,
                symbol: symbol.to_string(),
                reasoning,
                code_snippet: None,
            });
        }
    };

    for obs in transcript.observations() {
        let ToolResult::Success { data, .. } = &obs.result else {
            continue;
        };
        match obs.tool.as_str() {
            "search_symbol" => {
                let Some(first) = data["matches"].as_array().and_then(|m| m.first()) else {
                    continue;
                };
                push(
                    first["file"].as_str().unwrap_or(""),
                    first["line"].as_u64().unwrap_or(0) as usize,
                    first["name"].as_str().unwrap_or(""),
                    format!("search_symbol match for {}", data["query"]),
                );
            }
            "get_callers" => {
                let name = data["name"].as_str().unwrap_or("");
                for caller in data["callers"].as_array().into_iter().flatten() {
                    push(
                        caller["file"].as_str().unwrap_or(""),
                        caller["line"].as_u64().unwrap_or(0) as usize,
                        caller["caller"].as_str().unwrap_or("<module>"),
                        format!("calls {name}"),
                    );
                }
            }
            "read_file" => {
                push(
                    data["path"].as_str().unwrap_or(""),
                    data["start_line"].as_u64().unwrap_or(0) as usize,
                    "",
                    "file inspected during investigation".to_string(),
                );
            }
            _ => {}
        }
    }
    out
}

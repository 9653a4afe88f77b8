use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{parse_params, ParamSpec, ParamType, Tool, ToolContext, ToolOutput, ToolSpec};
use crate::error::ToolError;
use crate::investigation::{Phase, ReportDraft};

#[derive(Deserialize)]
pub struct SetPhaseParams {
    /// EXPLORE or ANALYZE
    pub phase: String,
    /// Why the investigation is moving to this phase
    pub reason: String,
}

#[derive(Deserialize)]
pub struct CompleteInvestigationParams {
    pub report: Value,
}

// ---------------------------------------------------------------------------
// set_phase
// ---------------------------------------------------------------------------

pub struct SetPhaseTool;

#[async_trait]
impl Tool for SetPhaseTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "set_phase",
            description: "Switch investigation phase. EXPLORE: keep searching the codebase. \
                          ANALYZE: enough evidence gathered, work out the root cause. \
                          Requires a short justification.",
            params: vec![
                ParamSpec::required("phase", ParamType::String, "EXPLORE or ANALYZE"),
                ParamSpec::required("reason", ParamType::String, "Why the phase is changing"),
            ],
            phases: Vec::new(),
        }
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: Map<String, Value>,
    ) -> Result<ToolOutput, ToolError> {
        let params: SetPhaseParams = parse_params("set_phase", args)?;
        let phase = Phase::parse(&params.phase).ok_or_else(|| {
            ToolError::validation(format!(
                "set_phase: unknown phase `{}`, expected EXPLORE or ANALYZE",
                params.phase
            ))
        })?;

        let reason = params.reason.trim();
        let min = ctx.config.investigation.min_phase_reason_len;
        if reason.chars().count() < min {
            return Err(ToolError::validation(format!(
                "set_phase: reason must be at least {min} characters"
            )));
        }

        let mut warnings = Vec::new();
        if phase == ctx.phase {
            warnings.push(format!("already in {phase}"));
        }
        Ok(ToolOutput::with_warnings(
            json!({
                "phase": phase,
                "previous": ctx.phase,
                "reason": reason,
            }),
            warnings,
        ))
    }
}

// ---------------------------------------------------------------------------
// complete_investigation
// ---------------------------------------------------------------------------

pub struct CompleteInvestigationTool;

#[async_trait]
impl Tool for CompleteInvestigationTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "complete_investigation",
            description: "Submit the final report and end the investigation. The report needs \
                          summary (at least 10 characters), relevant_locations (at least one \
                          {file_path, line, symbol, reasoning, code_snippet?}), root_cause, \
                          suggested_fix, confidence in [0, 1], and optionally exploration_trace.",
            params: vec![ParamSpec::required("report", ParamType::Object, "Final investigation report")],
            phases: vec![Phase::Analyze],
        }
    }

    async fn execute(
        &self,
        _ctx: &ToolContext,
        args: Map<String, Value>,
    ) -> Result<ToolOutput, ToolError> {
        let params: CompleteInvestigationParams = parse_params("complete_investigation", args)?;
        let draft = ReportDraft::parse(&params.report)?;
        tracing::info!(
            confidence = draft.confidence,
            locations = draft.relevant_locations.len(),
            "investigation report accepted"
        );
        let report = serde_json::to_value(&draft)
            .map_err(|e| ToolError::internal(format!("failed to encode report: {e}")))?;
        Ok(ToolOutput::new(json!({ "report": report })))
    }
}

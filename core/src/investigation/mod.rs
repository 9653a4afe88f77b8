//! Bounded, phase-tracked investigation loop driven by an external oracle.

pub mod report;
pub mod transcript;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::OracleError;
use crate::index::IndexSnapshot;
use crate::tools::{canonical_tool_name, ToolContext, ToolRegistry, ToolResult};

pub use report::{InvestigationReport, Outcome, ReportDraft, ReportLocation};
pub use transcript::{ErrorContext, Observation, Phase, PhaseTransition, Transcript};

// ---------------------------------------------------------------------------
// Oracle interface
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OracleDecision {
    ToolCall(ToolCall),
    /// Shorthand for calling `complete_investigation` with this report.
    FinalReport(Value),
}

/// Picks the next step given everything observed so far.
#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    async fn choose_next_action(&self, transcript: &Transcript) -> Result<OracleDecision, OracleError>;
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

enum OracleFailure {
    Cancelled,
    Exhausted { attempts: u32, last: OracleError },
}

pub struct Orchestrator {
    oracle: Arc<dyn ReasoningOracle>,
    registry: Arc<ToolRegistry>,
    config: Arc<Config>,
}

impl Orchestrator {
    pub fn new(
        oracle: Arc<dyn ReasoningOracle>,
        registry: Arc<ToolRegistry>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            oracle,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run one investigation to a terminal report. Always returns exactly one
    /// report; oracle failures, the iteration cap and cancellation all end in
    /// a confidence-0 report instead of an error.
    pub async fn investigate(
        &self,
        index: Arc<IndexSnapshot>,
        incident: ErrorContext,
        initial_phase: Phase,
        cancel: &CancellationToken,
    ) -> InvestigationReport {
        let cap = self.config.investigation.iteration_cap;
        let mut transcript = Transcript::new(incident, initial_phase, cap);
        tracing::info!(
            error_type = %transcript.incident.error_type,
            phase = %initial_phase,
            cap,
            "investigation started"
        );

        for iteration in 1..=cap {
            transcript.iteration = iteration;

            if cancel.is_cancelled() {
                return self.cancelled(&transcript, iteration - 1);
            }

            let decision = match self.ask_oracle(&transcript, cancel).await {
                Ok(d) => d,
                Err(OracleFailure::Cancelled) => return self.cancelled(&transcript, iteration - 1),
                Err(OracleFailure::Exhausted { attempts, last }) => {
                    tracing::warn!(attempts, error = %last, "oracle exhausted, investigation inconclusive");
                    return InvestigationReport::degraded(
                        Outcome::Inconclusive,
                        format!(
                            "Investigation inconclusive: the reasoning oracle failed {attempts} times ({}: {last}).",
                            last.kind()
                        ),
                        &transcript,
                        iteration - 1,
                    );
                }
            };

            let (name, arguments) = match decision {
                OracleDecision::ToolCall(call) => (call.name, call.arguments),
                OracleDecision::FinalReport(report) => {
                    ("complete_investigation".to_string(), json!({ "report": report }))
                }
            };

            let ctx = ToolContext::new(Arc::clone(&index), Arc::clone(&self.config))
                .with_phase(transcript.phase);
            let result = self.registry.execute(&ctx, &name, arguments.clone()).await;

            let tool = if self.registry.spec(&name).is_some() {
                canonical_tool_name(&name)
            } else {
                name
            };
            tracing::debug!(iteration, tool = %tool, success = result.is_success(), "observation");
            let observation = transcript.record(&tool, arguments, result).clone();

            let ToolResult::Success { data, .. } = &observation.result else {
                continue;
            };
            match tool.as_str() {
                "set_phase" => {
                    let next = data["phase"].as_str().and_then(Phase::parse);
                    let reason = data["reason"].as_str().unwrap_or("");
                    if let Some(next) = next {
                        if next != transcript.phase {
                            tracing::info!(iteration, from = %transcript.phase, to = %next, "phase transition");
                        }
                        transcript.transition(next, reason);
                    }
                }
                "complete_investigation" => match ReportDraft::parse(&data["report"]) {
                    Ok(draft) => {
                        tracing::info!(iteration, confidence = draft.confidence, "investigation completed");
                        return InvestigationReport::completed(draft, &transcript);
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "accepted report failed to decode");
                    }
                },
                _ => {}
            }
        }

        tracing::warn!(cap, "iteration cap reached without a final report");
        InvestigationReport::degraded(
            Outcome::IterationCapReached,
            format!("Investigation stopped: max iterations ({cap}) reached without a final report."),
            &transcript,
            cap,
        )
    }

    fn cancelled(&self, transcript: &Transcript, iterations: usize) -> InvestigationReport {
        tracing::info!(iterations, "investigation cancelled");
        InvestigationReport::degraded(
            Outcome::Cancelled,
            format!("Investigation cancelled after {iterations} iterations."),
            transcript,
            iterations,
        )
    }

    /// One oracle decision, with a timeout per call and exponential backoff
    /// between retries.
    async fn ask_oracle(
        &self,
        transcript: &Transcript,
        cancel: &CancellationToken,
    ) -> Result<OracleDecision, OracleFailure> {
        let settings = &self.config.investigation;
        let timeout = settings.oracle_timeout();
        let max_attempts = settings.oracle_max_retries + 1;
        let mut backoff = settings.oracle_backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let call = tokio::time::timeout(timeout, self.oracle.choose_next_action(transcript));
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(OracleFailure::Cancelled),
                outcome = call => outcome,
            };

            let err = match outcome {
                Ok(Ok(decision)) => return Ok(decision),
                Ok(Err(err)) => err,
                Err(_) => OracleError::Timeout(timeout.as_millis() as u64),
            };

            if attempt >= max_attempts {
                return Err(OracleFailure::Exhausted { attempts: attempt, last: err });
            }
            tracing::debug!(attempt, error = %err, backoff_ms = backoff.as_millis() as u64, "oracle call failed, retrying");

            tokio::select! {
                _ = cancel.cancelled() => return Err(OracleFailure::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = backoff.saturating_mul(2).min(Duration::from_secs(30));
        }
    }
}

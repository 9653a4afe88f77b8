//! Investigate, generate a fix, verify it, record, decide. Repeat until a fix
//! passes or the attempt ceiling is hit.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{Attempt, FixStrategy, RetryCoordinator, RetryDecision};
use crate::config::RetryConfig;
use crate::index::IndexSnapshot;
use crate::investigation::{ErrorContext, InvestigationReport, Orchestrator};

/// Error type recorded when the generator itself fails.
const GENERATION_FAILED: &str = "FixGenerationError";
/// Error type recorded when the verifier cannot run the candidate.
const VERIFICATION_FAILED: &str = "VerificationError";

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct FixRequest {
    pub buggy_code: String,
    pub error: ErrorContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<InvestigationReport>,
    pub strategy: FixStrategy,
    pub retrieved_solutions: Vec<String>,
    pub previous_attempts: Vec<Attempt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixProposal {
    pub fixed_code: String,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

#[async_trait]
pub trait FixGenerator: Send + Sync {
    async fn generate_fix(&self, request: &FixRequest) -> Result<FixProposal>;
}

/// Runs a candidate fix, e.g. in a sandbox. `auxiliary_files` maps relative
/// paths to content the candidate needs alongside it.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(
        &self,
        fixed_code: &str,
        auxiliary_files: &BTreeMap<String, String>,
    ) -> Result<Verification>;
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FixOutcome {
    Fixed {
        fixed_code: String,
        explanation: String,
        attempts: Vec<Attempt>,
        report: Option<InvestigationReport>,
    },
    Exhausted {
        reason: String,
        attempts: Vec<Attempt>,
        last_report: Option<InvestigationReport>,
    },
}

impl FixOutcome {
    pub fn is_fixed(&self) -> bool {
        matches!(self, FixOutcome::Fixed { .. })
    }

    pub fn attempts(&self) -> &[Attempt] {
        match self {
            FixOutcome::Fixed { attempts, .. } | FixOutcome::Exhausted { attempts, .. } => attempts,
        }
    }
}

// ---------------------------------------------------------------------------
// FixSession
// ---------------------------------------------------------------------------

pub struct FixSession {
    orchestrator: Arc<Orchestrator>,
    generator: Arc<dyn FixGenerator>,
    verifier: Arc<dyn Verifier>,
    config: RetryConfig,
    retrieved_solutions: Vec<String>,
    auxiliary_files: BTreeMap<String, String>,
}

impl FixSession {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        generator: Arc<dyn FixGenerator>,
        verifier: Arc<dyn Verifier>,
        config: RetryConfig,
    ) -> Self {
        Self {
            orchestrator,
            generator,
            verifier,
            config,
            retrieved_solutions: Vec::new(),
            auxiliary_files: BTreeMap::new(),
        }
    }

    /// Past solutions handed to the generator with every request.
    pub fn with_solutions(mut self, solutions: Vec<String>) -> Self {
        self.retrieved_solutions = solutions;
        self
    }

    pub fn with_auxiliary_files(mut self, files: BTreeMap<String, String>) -> Self {
        self.auxiliary_files = files;
        self
    }

    pub async fn run(
        &self,
        index: Arc<IndexSnapshot>,
        incident: ErrorContext,
        buggy_code: &str,
        start: FixStrategy,
        cancel: &CancellationToken,
    ) -> FixOutcome {
        let mut coordinator = RetryCoordinator::starting_with(self.config.clone(), start);
        let mut error = incident;
        let mut last_report: Option<InvestigationReport> = None;

        loop {
            if cancel.is_cancelled() {
                return FixOutcome::Exhausted {
                    reason: "cancelled".to_string(),
                    attempts: coordinator.detector().attempts().to_vec(),
                    last_report,
                };
            }

            let strategy = coordinator.strategy();
            if let Some(phase) = strategy.initial_phase() {
                let report = self
                    .orchestrator
                    .investigate(Arc::clone(&index), error.clone(), phase, cancel)
                    .await;
                last_report = Some(report);
            }

            let request = FixRequest {
                buggy_code: buggy_code.to_string(),
                error: error.clone(),
                report: last_report.clone(),
                strategy,
                retrieved_solutions: self.retrieved_solutions.clone(),
                previous_attempts: coordinator.detector().attempts().to_vec(),
            };

            let (fixed_code, explanation, failure) = self.attempt(&request).await;
            let recorded = match &failure {
                None => coordinator.record(&fixed_code, None, None, true),
                Some((kind, message)) => {
                    coordinator.record(&fixed_code, Some(kind.as_str()), Some(message.as_str()), false)
                }
            };
            let decision = match recorded {
                Ok(d) => d,
                Err(err) => {
                    tracing::warn!(error = %err, "attempt rejected");
                    return FixOutcome::Exhausted {
                        reason: err.to_string(),
                        attempts: coordinator.detector().attempts().to_vec(),
                        last_report,
                    };
                }
            };
            tracing::info!(
                attempt = coordinator.detector().len(),
                strategy = ?strategy,
                decision = ?decision,
                "fix attempt evaluated"
            );

            match decision {
                RetryDecision::Succeeded => {
                    return FixOutcome::Fixed {
                        fixed_code,
                        explanation,
                        attempts: coordinator.detector().attempts().to_vec(),
                        report: last_report,
                    };
                }
                RetryDecision::Abandon { reason, .. } => {
                    return FixOutcome::Exhausted {
                        reason,
                        attempts: coordinator.detector().attempts().to_vec(),
                        last_report,
                    };
                }
                RetryDecision::Retry { .. }
                | RetryDecision::SwitchStrategy { .. }
                | RetryDecision::Escalate { .. } => {
                    if let Some((kind, message)) = failure {
                        error.error_type = kind;
                        error.error_message = message;
                    }
                }
            }
        }
    }

    /// Generate and verify one candidate. Returns the code, the generator's
    /// explanation and, on failure, the `(error_type, error_message)` pair.
    async fn attempt(&self, request: &FixRequest) -> (String, String, Option<(String, String)>) {
        let proposal = match self.generator.generate_fix(request).await {
            Ok(p) => p,
            Err(err) => {
                tracing::warn!(error = %err, "fix generation failed");
                return (
                    String::new(),
                    String::new(),
                    Some((GENERATION_FAILED.to_string(), format!("{err:#}"))),
                );
            }
        };

        let failure = match self
            .verifier
            .verify(&proposal.fixed_code, &self.auxiliary_files)
            .await
        {
            Ok(v) if v.success => None,
            Ok(v) => Some(parse_error_output(&v)),
            Err(err) => {
                tracing::warn!(error = %err, "verification failed to run");
                Some((VERIFICATION_FAILED.to_string(), format!("{err:#}")))
            }
        };
        (proposal.fixed_code, proposal.explanation, failure)
    }
}

// ---------------------------------------------------------------------------
// Traceback parsing
// ---------------------------------------------------------------------------

/// `(error_type, error_message)` from the last exception line of a Python
/// traceback, e.g. `KeyError: 'name'`. Falls back to the exit code.
pub fn parse_error_output(verification: &Verification) -> (String, String) {
    let last = verification
        .stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty());

    if let Some(line) = last {
        let (head, message) = match line.split_once(':') {
            Some((head, rest)) => (head.trim(), rest.trim()),
            None => (line, ""),
        };
        if is_exception_name(head) {
            let name = head.rsplit('.').next().unwrap_or(head);
            return (name.to_string(), message.to_string());
        }
        return ("RuntimeError".to_string(), line.to_string());
    }

    let code = verification
        .exit_code
        .map_or_else(|| "unknown".to_string(), |c| c.to_string());
    ("RuntimeError".to_string(), format!("process exited with status {code}"))
}

fn is_exception_name(text: &str) -> bool {
    !text.is_empty()
        && text.split('.').all(|part| {
            part.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
        && text
            .rsplit('.')
            .next()
            .is_some_and(|n| n.chars().next().is_some_and(|c| c.is_ascii_uppercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str) -> Verification {
        Verification {
            success: false,
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code: Some(1),
        }
    }

    #[test]
    fn exception_line_is_parsed() {
        let v = failed(
            "Traceback (most recent call last):\n  File \"main.py\", line 3, in <module>\n    cfg['log_level']\nKeyError: 'log_level'\n",
        );
        assert_eq!(
            parse_error_output(&v),
            ("KeyError".to_string(), "'log_level'".to_string())
        );
    }

    #[test]
    fn dotted_exception_keeps_last_segment() {
        let v = failed("json.decoder.JSONDecodeError: Expecting value: line 1 column 1");
        let (kind, message) = parse_error_output(&v);
        assert_eq!(kind, "JSONDecodeError");
        assert_eq!(message, "Expecting value: line 1 column 1");
    }

    #[test]
    fn empty_stderr_falls_back_to_exit_code() {
        let v = failed("");
        assert_eq!(parse_error_output(&v).1, "process exited with status 1");
    }
}

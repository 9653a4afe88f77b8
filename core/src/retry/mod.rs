//! Attempt history, loop detection and the retry/escalate/abandon policy.

pub mod session;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RetryConfig;
use crate::error::AttemptError;
use crate::investigation::Phase;
use crate::scanner::content_hash;

// ---------------------------------------------------------------------------
// Attempt
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    /// 1-based position in the history.
    pub index: usize,
    pub layer: u32,
    pub code_fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub success: bool,
    pub recorded_at: DateTime<Utc>,
}

impl Attempt {
    /// `(error_type, error_message)` with whitespace collapsed, for failed
    /// attempts only.
    fn error_key(&self) -> Option<(String, String)> {
        if self.success {
            return None;
        }
        Some((
            collapse(self.error_type.as_deref().unwrap_or("")),
            collapse(self.error_message.as_deref().unwrap_or("")),
        ))
    }
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// SHA-256 of the code with all whitespace runs collapsed, so reformatting
/// alone does not make a fix look new.
pub fn code_fingerprint(code: &str) -> String {
    content_hash(collapse(code).as_bytes())
}

// ---------------------------------------------------------------------------
// LoopSignal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopKind {
    SimilarCode,
    SameError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopSignal {
    pub is_loop: bool,
    pub kind: Option<LoopKind>,
    pub evidence: String,
}

impl LoopSignal {
    fn none() -> Self {
        Self {
            is_loop: false,
            kind: None,
            evidence: String::new(),
        }
    }

    fn detected(kind: LoopKind, evidence: String) -> Self {
        Self {
            is_loop: true,
            kind: Some(kind),
            evidence,
        }
    }
}

// ---------------------------------------------------------------------------
// LoopDetector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoopDetector {
    config: RetryConfig,
    attempts: Vec<Attempt>,
}

impl LoopDetector {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts: Vec::new(),
        }
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn ceiling_reached(&self) -> bool {
        self.attempts.len() >= self.config.max_attempts
    }

    /// Append an attempt. Malformed data is rejected without touching the
    /// history: a non-positive layer, a failed attempt without an error
    /// type, or any attempt past the ceiling.
    pub fn record_attempt(
        &mut self,
        fixed_code: &str,
        error_type: Option<&str>,
        error_message: Option<&str>,
        layer: i64,
        success: bool,
    ) -> Result<&Attempt, AttemptError> {
        if layer <= 0 {
            return Err(AttemptError::Validation(format!(
                "layer must be positive, got {layer}"
            )));
        }
        let layer = u32::try_from(layer)
            .map_err(|_| AttemptError::Validation(format!("layer {layer} is out of range")))?;
        let error_type = error_type.map(str::trim).filter(|t| !t.is_empty());
        if !success && error_type.is_none() {
            return Err(AttemptError::Validation(
                "a failed attempt needs an error type".to_string(),
            ));
        }
        if self.ceiling_reached() {
            return Err(AttemptError::Validation(format!(
                "attempt ceiling of {} already reached",
                self.config.max_attempts
            )));
        }

        self.attempts.push(Attempt {
            index: self.attempts.len() + 1,
            layer,
            code_fingerprint: code_fingerprint(fixed_code),
            error_type: error_type.map(str::to_string),
            error_message: error_message.map(str::to_string),
            success,
            recorded_at: Utc::now(),
        });
        let last = self.attempts.len() - 1;
        tracing::debug!(
            index = self.attempts[last].index,
            layer,
            success,
            "attempt recorded"
        );
        Ok(&self.attempts[last])
    }

    /// Inspect the latest attempt. A repeated error run takes precedence over
    /// a repeated fix.
    pub fn check_loop(&self) -> LoopSignal {
        let Some(latest) = self.attempts.last() else {
            return LoopSignal::none();
        };
        let Some(latest_error) = latest.error_key() else {
            return LoopSignal::none();
        };

        let run = self
            .attempts
            .iter()
            .rev()
            .take_while(|a| a.error_key().as_ref() == Some(&latest_error))
            .count();
        if run >= self.config.same_error_threshold {
            return LoopSignal::detected(
                LoopKind::SameError,
                format!(
                    "{}: {} occurred in the last {run} attempts",
                    latest_error.0, latest_error.1
                ),
            );
        }

        let previous = &self.attempts[..self.attempts.len() - 1];
        let window_start = previous.len().saturating_sub(self.config.similar_code_window);
        if let Some(twin) = previous[window_start..]
            .iter()
            .rev()
            .find(|a| a.code_fingerprint == latest.code_fingerprint)
        {
            return LoopSignal::detected(
                LoopKind::SimilarCode,
                format!(
                    "attempt {} produced the same code as attempt {}",
                    latest.index, twin.index
                ),
            );
        }

        LoopSignal::none()
    }
}

// ---------------------------------------------------------------------------
// RetryCoordinator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStrategy {
    /// Fix straight from the error, no investigation.
    PatternFix,
    Investigation,
    /// Investigation that starts in ANALYZE.
    DeepInvestigation,
}

impl FixStrategy {
    pub fn layer(&self) -> i64 {
        match self {
            FixStrategy::PatternFix => 1,
            FixStrategy::Investigation => 2,
            FixStrategy::DeepInvestigation => 3,
        }
    }

    /// Next strategy up, saturating at the deepest.
    pub fn next(&self) -> Self {
        match self {
            FixStrategy::PatternFix => FixStrategy::Investigation,
            FixStrategy::Investigation | FixStrategy::DeepInvestigation => {
                FixStrategy::DeepInvestigation
            }
        }
    }

    /// Phase an investigation under this strategy starts in; `None` when the
    /// strategy does not investigate.
    pub fn initial_phase(&self) -> Option<Phase> {
        match self {
            FixStrategy::PatternFix => None,
            FixStrategy::Investigation => Some(Phase::Explore),
            FixStrategy::DeepInvestigation => Some(Phase::Analyze),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RetryDecision {
    Succeeded,
    /// Try again with the same strategy.
    Retry { strategy: FixStrategy },
    /// The same fix came back; change approach.
    SwitchStrategy {
        from: FixStrategy,
        to: FixStrategy,
        evidence: String,
    },
    /// The same error keeps coming back; investigate deeper, starting in ANALYZE.
    Escalate {
        strategy: FixStrategy,
        phase: Phase,
        evidence: String,
    },
    /// Attempt ceiling hit. Terminal.
    Abandon { attempts: usize, reason: String },
}

impl RetryDecision {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RetryDecision::Succeeded | RetryDecision::Abandon { .. })
    }
}

pub struct RetryCoordinator {
    detector: LoopDetector,
    strategy: FixStrategy,
}

impl RetryCoordinator {
    pub fn new(config: RetryConfig) -> Self {
        Self::starting_with(config, FixStrategy::PatternFix)
    }

    pub fn starting_with(config: RetryConfig, strategy: FixStrategy) -> Self {
        Self {
            detector: LoopDetector::new(config),
            strategy,
        }
    }

    pub fn strategy(&self) -> FixStrategy {
        self.strategy
    }

    pub fn detector(&self) -> &LoopDetector {
        &self.detector
    }

    /// Record an attempt made under the current strategy and decide what
    /// happens next.
    pub fn record(
        &mut self,
        fixed_code: &str,
        error_type: Option<&str>,
        error_message: Option<&str>,
        success: bool,
    ) -> Result<RetryDecision, AttemptError> {
        let layer = self.strategy.layer();
        self.detector
            .record_attempt(fixed_code, error_type, error_message, layer, success)?;
        Ok(self.decide())
    }

    /// Success, ceiling, error loop, code loop, otherwise plain retry.
    pub fn decide(&mut self) -> RetryDecision {
        let Some(latest) = self.detector.attempts().last() else {
            return RetryDecision::Retry {
                strategy: self.strategy,
            };
        };
        if latest.success {
            return RetryDecision::Succeeded;
        }
        if self.detector.ceiling_reached() {
            let attempts = self.detector.len();
            tracing::warn!(attempts, "attempt ceiling reached, abandoning");
            return RetryDecision::Abandon {
                attempts,
                reason: format!("exhausted after {attempts} attempts without a passing fix"),
            };
        }

        let signal = self.detector.check_loop();
        match signal.kind {
            Some(LoopKind::SameError) => {
                self.strategy = FixStrategy::DeepInvestigation;
                tracing::info!(evidence = %signal.evidence, "same error loop, escalating");
                RetryDecision::Escalate {
                    strategy: self.strategy,
                    phase: Phase::Analyze,
                    evidence: signal.evidence,
                }
            }
            Some(LoopKind::SimilarCode) => {
                let from = self.strategy;
                self.strategy = from.next();
                tracing::info!(evidence = %signal.evidence, from = ?from, to = ?self.strategy, "repeated fix, switching strategy");
                RetryDecision::SwitchStrategy {
                    from,
                    to: self.strategy,
                    evidence: signal.evidence,
                }
            }
            None => RetryDecision::Retry {
                strategy: self.strategy,
            },
        }
    }
}

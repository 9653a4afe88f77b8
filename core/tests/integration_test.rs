use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use sleuth_core::config::{Config, CONFIG_FILE_NAME};
use sleuth_core::error::OracleError;
use sleuth_core::index::IndexStore;
use sleuth_core::investigation::{
    ErrorContext, OracleDecision, Orchestrator, Outcome, Phase, ReasoningOracle, ToolCall,
    Transcript,
};
use sleuth_core::retry::session::{
    FixGenerator, FixOutcome, FixProposal, FixRequest, FixSession, Verification, Verifier,
};
use sleuth_core::retry::FixStrategy;
use sleuth_core::tools::{ToolResult, ToolRegistry};

/// Helper: write a file into the temp directory at a relative path.
fn write_file(dir: &TempDir, rel_path: &str, content: &str) {
    let full = dir.path().join(rel_path);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&full, content).unwrap();
}

const APP: &str = "from settings import load_config\n\n\ndef run():\n    cfg = load_config()\n    return cfg[\"log_level\"]\n";

/// Looks up the missing key, moves to ANALYZE, then reports whatever the
/// key lookup pointed at.
struct KeyErrorOracle;

#[async_trait]
impl ReasoningOracle for KeyErrorOracle {
    async fn choose_next_action(&self, transcript: &Transcript) -> Result<OracleDecision, OracleError> {
        let observations = transcript.observations();
        match observations.len() {
            0 => Ok(OracleDecision::ToolCall(ToolCall::new(
                "searchLiteralKey",
                json!({"key": transcript.incident.error_message.trim_matches('\'')}),
            ))),
            1 => Ok(OracleDecision::ToolCall(ToolCall::new(
                "set_phase",
                json!({"phase": "ANALYZE", "reason": "the key moved into a nested dict"}),
            ))),
            _ => {
                let ToolResult::Success { data, .. } = &observations[0].result else {
                    return Err(OracleError::MalformedOutput("key lookup failed".into()));
                };
                let origin = &data["origins"][0];
                Ok(OracleDecision::FinalReport(json!({
                    "summary": format!("{} now returns the level under {}", origin["function"], origin["access_path"]),
                    "relevant_locations": [{
                        "file_path": origin["file"],
                        "line": origin["line"],
                        "symbol": origin["function"],
                        "reasoning": "returned dict no longer has log_level at the top level"
                    }],
                    "root_cause": "log_level was restructured into logging.level",
                    "suggested_fix": format!("read cfg{}", origin["access_path"].as_str().unwrap_or("")),
                    "confidence": origin["confidence"],
                })))
            }
        }
    }
}

/// Applies the report's suggested access path.
struct ReportDrivenGenerator;

#[async_trait]
impl FixGenerator for ReportDrivenGenerator {
    async fn generate_fix(&self, request: &FixRequest) -> Result<FixProposal> {
        let report = request
            .report
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no report"))?;
        let access = report.suggested_fix.trim_start_matches("read cfg");
        Ok(FixProposal {
            fixed_code: request
                .buggy_code
                .replace("cfg[\"log_level\"]", &format!("cfg{access}")),
            explanation: report.root_cause.clone(),
        })
    }
}

struct NestedKeyVerifier;

#[async_trait]
impl Verifier for NestedKeyVerifier {
    async fn verify(&self, fixed_code: &str, _aux: &BTreeMap<String, String>) -> Result<Verification> {
        let success = fixed_code.contains("cfg[\"logging\"][\"level\"]");
        Ok(Verification {
            success,
            stdout: String::new(),
            stderr: if success {
                String::new()
            } else {
                "KeyError: 'log_level'".to_string()
            },
            exit_code: Some(if success { 0 } else { 1 }),
        })
    }
}

/// End-to-end: config discovery, index build and persistence, an
/// investigation through the tool registry, then a verified fix.
#[tokio::test]
async fn test_key_error_pipeline() {
    // ---------------------------------------------------------------
    // 1. Project with a restructured config dict
    // ---------------------------------------------------------------
    let dir = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    write_file(
        &dir,
        "settings.py",
        "def load_config():\n    return {\"logging\": {\"level\": \"info\"}, \"timeout\": 30}\n",
    );
    write_file(&dir, "app.py", APP);
    write_file(
        &dir,
        CONFIG_FILE_NAME,
        &format!(
            "[index]\ncache_dir = {:?}\n\n[investigation]\niteration_cap = 5\n",
            cache.path().to_string_lossy()
        ),
    );

    let config = Config::discover(dir.path()).unwrap();
    assert_eq!(config.investigation.iteration_cap, 5);

    // ---------------------------------------------------------------
    // 2. Index, persisted under the configured cache dir
    // ---------------------------------------------------------------
    let store = IndexStore::new(config.index.clone());
    let snapshot = store.load_or_build(dir.path()).unwrap();
    assert!(store.snapshot_path(&snapshot.root).starts_with(cache.path()));
    assert!(store.snapshot_path(&snapshot.root).is_file());
    assert_eq!(snapshot.stats().files, 2);
    let index = Arc::new(snapshot);

    // ---------------------------------------------------------------
    // 3. Investigation
    // ---------------------------------------------------------------
    let config = Arc::new(config);
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(KeyErrorOracle),
        Arc::new(ToolRegistry::with_defaults()),
        Arc::clone(&config),
    ));
    let incident = ErrorContext::new("KeyError", "'log_level'").at("app.py", 6);

    let report = orchestrator
        .investigate(
            Arc::clone(&index),
            incident.clone(),
            Phase::Explore,
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(report.outcome, Outcome::Completed);
    assert_eq!(report.iterations, 3);
    assert_eq!(report.locations[0].file_path, "settings.py");
    assert_eq!(report.locations[0].symbol, "load_config");
    assert_eq!(report.suggested_fix, "read cfg[\"logging\"][\"level\"]");
    assert!(report.confidence > 0.0 && report.confidence <= 1.0);
    assert_eq!(report.phase_log.len(), 1);

    // ---------------------------------------------------------------
    // 4. Fix session driven by the investigation
    // ---------------------------------------------------------------
    let session = FixSession::new(
        orchestrator,
        Arc::new(ReportDrivenGenerator),
        Arc::new(NestedKeyVerifier),
        config.retry.clone(),
    );
    let outcome = session
        .run(index, incident, APP, FixStrategy::Investigation, &CancellationToken::new())
        .await;

    let FixOutcome::Fixed { fixed_code, attempts, .. } = outcome else {
        panic!("expected the pipeline to produce a fix");
    };
    assert!(fixed_code.contains("return cfg[\"logging\"][\"level\"]"), "{fixed_code}");
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].layer, 2);
}

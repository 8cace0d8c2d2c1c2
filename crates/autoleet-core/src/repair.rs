//! Bounded test-and-repair loop.
//!
//! ```text
//!            ┌─────────── repaired ───────────┐
//!            ▼                                │
//!        Testing ── fail, budget left ──► Repairing
//!         │    │                              │
//!  success│    │fail, budget spent            │generator error
//!         ▼    ▼                              ▼
//!   Succeeded  ExhaustedAttempts ◄────────────┘
//! ```
//!
//! The script on disk always matches the last tested text. A generator
//! failure during repair ends the loop immediately with the current script;
//! the remaining attempt budget is not spent.

use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{AutoleetError, Result};
use crate::extract::{extract_code, CandidateScript};
use crate::generator::CodeGenerator;
use crate::obs;
use crate::sandbox::{ExecutionOutcome, ExecutionResult, ScriptExecutor};

/// Upper bound on executions per artifact.
pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairState {
    Testing,
    Repairing,
    Succeeded,
    ExhaustedAttempts,
}

/// Terminal state of a loop run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairOutcome {
    Succeeded,
    ExhaustedAttempts,
}

/// One execution of one script version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based.
    pub attempt: u32,
    /// SHA-256 of the tested script text.
    pub script_digest: String,
    pub success: bool,
    pub outcome: ExecutionOutcome,
    pub diagnostic: String,
    pub duration_ms: u64,
}

/// Everything a loop run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    pub outcome: RepairOutcome,
    /// The last tested script; also what is on disk.
    pub script: CandidateScript,
    pub attempts: Vec<AttemptRecord>,
    /// Set when the generator failed to repair.
    pub repair_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RepairReport {
    pub fn succeeded(&self) -> bool {
        self.outcome == RepairOutcome::Succeeded
    }

    pub fn attempts_used(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn last_diagnostic(&self) -> Option<&str> {
        self.attempts.last().map(|a| a.diagnostic.as_str())
    }
}

/// Hex SHA-256 of a script text.
pub fn script_digest(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

/// Drives [`RepairState`] for one script.
pub struct RepairLoop<'a> {
    executor: &'a dyn ScriptExecutor,
    generator: &'a dyn CodeGenerator,
    max_attempts: u32,
}

impl<'a> RepairLoop<'a> {
    pub fn new(executor: &'a dyn ScriptExecutor, generator: &'a dyn CodeGenerator) -> Self {
        Self {
            executor,
            generator,
            max_attempts: MAX_ATTEMPTS,
        }
    }

    /// Override the attempt ceiling (at least one execution always happens).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Test `script` at `output_path`, repairing on failure.
    ///
    /// Returns `Err` only for errors that are not about the script itself:
    /// the output file cannot be written, or the runner cannot run anything.
    pub async fn run(&self, output_path: &Path, mut script: CandidateScript) -> Result<RepairReport> {
        let started_at = Utc::now();
        let mut state = RepairState::Testing;
        let mut repairs = 0u32;
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut last: Option<ExecutionResult> = None;
        let mut repair_error = None;

        loop {
            state = match state {
                RepairState::Testing => {
                    tokio::fs::write(output_path, &script.code).await.map_err(|e| {
                        AutoleetError::FileHandling(format!(
                            "cannot write {}: {e}",
                            output_path.display()
                        ))
                    })?;

                    let clock = Instant::now();
                    let result = self.executor.execute(output_path).await?;
                    let attempt = repairs + 1;
                    obs::emit_attempt_finished(
                        attempt,
                        result.success,
                        result.outcome.label(),
                        clock.elapsed().as_millis() as u64,
                    );
                    attempts.push(AttemptRecord {
                        attempt,
                        script_digest: script_digest(&script.code),
                        success: result.success,
                        outcome: result.outcome,
                        diagnostic: result.diagnostic.clone(),
                        duration_ms: result.duration_ms,
                    });

                    let next = if result.success {
                        RepairState::Succeeded
                    } else if repairs + 1 >= self.max_attempts {
                        RepairState::ExhaustedAttempts
                    } else {
                        RepairState::Repairing
                    };
                    last = Some(result);
                    next
                }
                RepairState::Repairing => {
                    let diagnostic = last.as_ref().map(|r| r.diagnostic.as_str()).unwrap_or("");
                    obs::emit_repair_requested(repairs + 1, diagnostic.len());

                    match self.generator.repair(&script.code, diagnostic).await {
                        Ok(reply) => {
                            let repaired = extract_code(&reply);
                            if script_digest(&repaired) == script_digest(&script.code) {
                                warn!(attempt = repairs + 1, "repair returned the same script");
                            }
                            script.code = repaired;
                            repairs += 1;
                            RepairState::Testing
                        }
                        Err(err) => {
                            obs::emit_repair_failed(repairs + 1, &err);
                            repair_error = Some(err.to_string());
                            RepairState::ExhaustedAttempts
                        }
                    }
                }
                RepairState::Succeeded | RepairState::ExhaustedAttempts => break,
            };
        }

        let outcome = match state {
            RepairState::Succeeded => RepairOutcome::Succeeded,
            _ => RepairOutcome::ExhaustedAttempts,
        };
        Ok(RepairReport {
            outcome,
            script,
            attempts,
            repair_error,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::generator::{ConnectionReport, GenerationInput};
    use crate::sandbox::{SandboxError, SandboxResult};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Passes any script containing `PASS`; records what it saw on disk.
    #[derive(Default)]
    struct MarkerExecutor {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ScriptExecutor for MarkerExecutor {
        async fn execute(&self, path: &Path) -> SandboxResult<ExecutionResult> {
            let code = std::fs::read_to_string(path).unwrap();
            self.seen.lock().unwrap().push(code.clone());
            if code.contains("PASS") {
                Ok(ExecutionResult::passed(1))
            } else {
                Ok(ExecutionResult::failed(Some(1), format!("failed: {code}"), 1))
            }
        }
    }

    struct MissingInterpreter;

    #[async_trait]
    impl ScriptExecutor for MissingInterpreter {
        async fn execute(&self, _path: &Path) -> SandboxResult<ExecutionResult> {
            Err(SandboxError::InterpreterNotFound {
                interpreter: "python3".into(),
            })
        }
    }

    /// Replies with scripted repairs in order; errors once they run out.
    struct ScriptedRepairs {
        replies: Mutex<Vec<std::result::Result<String, ProviderError>>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedRepairs {
        fn new(replies: Vec<std::result::Result<String, ProviderError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CodeGenerator for ScriptedRepairs {
        fn provider(&self) -> &str {
            "scripted"
        }
        fn model(&self) -> &str {
            "test"
        }
        async fn generate(
            &self,
            _input: &GenerationInput,
            _prompt: &str,
        ) -> std::result::Result<String, ProviderError> {
            unreachable!("the loop never generates")
        }
        async fn repair(
            &self,
            script: &str,
            diagnostic: &str,
        ) -> std::result::Result<String, ProviderError> {
            self.calls
                .lock()
                .unwrap()
                .push((script.to_string(), diagnostic.to_string()));
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(ProviderError::EmptyResponse {
                    provider: "scripted".into(),
                }))
        }
        async fn check_connection(&self) -> ConnectionReport {
            unreachable!()
        }
    }

    fn fenced(code: &str) -> std::result::Result<String, ProviderError> {
        Ok(format!("```python\n{code}\n```"))
    }

    #[tokio::test]
    async fn succeeds_first_try_without_repair() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("s.py");
        let exec = MarkerExecutor::default();
        let gen = ScriptedRepairs::new(vec![]);

        let report = RepairLoop::new(&exec, &gen)
            .run(&out, CandidateScript::new(None, "print('PASS')"))
            .await
            .unwrap();

        assert!(report.succeeded());
        assert_eq!(report.attempts_used(), 1);
        assert!(gen.calls.lock().unwrap().is_empty());
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "print('PASS')");
    }

    #[tokio::test]
    async fn repair_receives_script_and_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("s.py");
        let exec = MarkerExecutor::default();
        let gen = ScriptedRepairs::new(vec![fenced("print('PASS')")]);

        let report = RepairLoop::new(&exec, &gen)
            .run(&out, CandidateScript::new(Some("T".into()), "1/0"))
            .await
            .unwrap();

        assert!(report.succeeded());
        assert_eq!(report.attempts_used(), 2);
        assert_eq!(report.script.title.as_deref(), Some("T"));
        let calls = gen.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "1/0");
        assert_eq!(calls[0].1, "failed: 1/0");
        assert_ne!(report.attempts[0].script_digest, report.attempts[1].script_digest);
    }

    #[tokio::test]
    async fn never_exceeds_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("s.py");
        let exec = MarkerExecutor::default();
        let gen = ScriptedRepairs::new(vec![
            fenced("v2"),
            fenced("v3"),
            fenced("v4"),
            fenced("v5"),
        ]);

        let report = RepairLoop::new(&exec, &gen)
            .run(&out, CandidateScript::new(None, "v1"))
            .await
            .unwrap();

        assert_eq!(report.outcome, RepairOutcome::ExhaustedAttempts);
        assert_eq!(report.attempts_used(), MAX_ATTEMPTS);
        assert_eq!(*exec.seen.lock().unwrap(), vec!["v1", "v2", "v3"]);
        assert_eq!(gen.calls.lock().unwrap().len(), 2);
        assert_eq!(report.script.code, "v3");
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "v3");
    }

    #[tokio::test]
    async fn generator_failure_shortcuts_to_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("s.py");
        let exec = MarkerExecutor::default();
        let gen = ScriptedRepairs::new(vec![Err(ProviderError::Http {
            provider: "scripted".into(),
            message: "connection reset".into(),
        })]);

        let report = RepairLoop::new(&exec, &gen)
            .run(&out, CandidateScript::new(None, "v1"))
            .await
            .unwrap();

        assert_eq!(report.outcome, RepairOutcome::ExhaustedAttempts);
        assert_eq!(report.attempts_used(), 1);
        assert_eq!(report.script.code, "v1");
        assert!(report.repair_error.unwrap().contains("connection reset"));
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "v1");
    }

    #[tokio::test]
    async fn custom_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("s.py");
        let exec = MarkerExecutor::default();
        let gen = ScriptedRepairs::new(vec![fenced("v2")]);

        let looped = RepairLoop::new(&exec, &gen).with_max_attempts(0);
        assert_eq!(looped.max_attempts(), 1);
        let report = looped
            .run(&out, CandidateScript::new(None, "v1"))
            .await
            .unwrap();
        assert_eq!(report.attempts_used(), 1);
        assert!(gen.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_interpreter_aborts_loop() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("s.py");
        let gen = ScriptedRepairs::new(vec![]);

        let err = RepairLoop::new(&MissingInterpreter, &gen)
            .run(&out, CandidateScript::new(None, "print(1)"))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn digest_is_stable_hex() {
        let d = script_digest("print(1)");
        assert_eq!(d.len(), 64);
        assert_eq!(d, script_digest("print(1)"));
        assert_ne!(d, script_digest("print(2)"));
    }
}

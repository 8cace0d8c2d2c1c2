//! Bounded execution of candidate scripts.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::error::{SandboxError, SandboxResult};
use super::validator::StaticValidator;
use crate::config::SecurityConfig;

/// Bytes kept per output stream.
pub const MAX_CAPTURE_BYTES: usize = 64 * 1024;

/// Bytes of diagnostic text handed back to the caller.
pub const MAX_DIAGNOSTIC_BYTES: usize = 8 * 1024;

/// Name prefix of the per-run scratch directories.
pub const SCRATCH_PREFIX: &str = "autoleet-run-";

/// Minimum time allowed for output pipes to close after the child exits.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Environment variables passed through to the child.
const INHERITED_ENV: &[&str] = &["PATH", "SYSTEMROOT", "LANG", "LC_ALL"];

/// Configuration for one runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub interpreter: String,
    pub timeout: Duration,
    pub max_open_files: u64,
    pub max_memory_mb: u64,
    /// Apply `max_memory_mb` as `RLIMIT_AS`; otherwise it is only logged.
    pub enforce_memory_limit: bool,
    /// Screen scripts with [`StaticValidator`] before running them.
    pub validate: bool,
    /// Parent of per-run scratch directories; the system temp dir when unset.
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from(&SecurityConfig::default())
    }
}

impl From<&SecurityConfig> for RunnerConfig {
    fn from(sec: &SecurityConfig) -> Self {
        Self {
            interpreter: sec.interpreter.clone(),
            timeout: sec.code_timeout(),
            max_open_files: sec.max_open_files,
            max_memory_mb: sec.max_memory_mb,
            enforce_memory_limit: sec.enforce_memory_limit,
            validate: sec.enable_ast_validation,
            scratch_root: None,
        }
    }
}

/// How an execution attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ExecutionOutcome {
    Passed,
    /// Static validation refused the script; nothing was spawned.
    Rejected,
    Failed { exit_code: Option<i32> },
    TimedOut,
}

impl ExecutionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Passed => "passed",
            ExecutionOutcome::Rejected => "rejected",
            ExecutionOutcome::Failed { .. } => "failed",
            ExecutionOutcome::TimedOut => "timed_out",
        }
    }
}

/// Result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Empty on success; otherwise what went wrong, for the repair prompt.
    pub diagnostic: String,
    pub outcome: ExecutionOutcome,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn passed(duration_ms: u64) -> Self {
        Self {
            success: true,
            diagnostic: String::new(),
            outcome: ExecutionOutcome::Passed,
            duration_ms,
        }
    }

    pub fn rejected(reason: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            diagnostic: reason.into(),
            outcome: ExecutionOutcome::Rejected,
            duration_ms,
        }
    }

    pub fn failed(exit_code: Option<i32>, diagnostic: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            diagnostic: truncate_diagnostic(&diagnostic.into()),
            outcome: ExecutionOutcome::Failed { exit_code },
            duration_ms,
        }
    }

    pub fn timed_out(limit: Duration, duration_ms: u64) -> Self {
        Self {
            success: false,
            diagnostic: format!("execution timed out after {}s", limit.as_secs_f64()),
            outcome: ExecutionOutcome::TimedOut,
            duration_ms,
        }
    }
}

/// Anything that can run a script file and judge it.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn execute(&self, script_path: &Path) -> SandboxResult<ExecutionResult>;
}

/// Runs scripts with an interpreter as a bounded child process.
#[derive(Debug, Clone)]
pub struct SandboxRunner {
    config: RunnerConfig,
    validator: Option<StaticValidator>,
}

impl SandboxRunner {
    pub fn new(config: RunnerConfig) -> SandboxResult<Self> {
        if config.interpreter.trim().is_empty() {
            return Err(SandboxError::InvalidConfig("interpreter is empty".into()));
        }
        if config.timeout.is_zero() {
            return Err(SandboxError::InvalidConfig("timeout must be positive".into()));
        }
        let validator = config.validate.then(StaticValidator::new);
        Ok(Self { config, validator })
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Confirm the interpreter can be started; returns its version banner.
    pub async fn probe_interpreter(&self) -> SandboxResult<String> {
        let output = Command::new(&self.config.interpreter)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();
        let output = match tokio::time::timeout(Duration::from_secs(10), output).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SandboxError::InterpreterNotFound {
                    interpreter: self.config.interpreter.clone(),
                })
            }
            Ok(Err(e)) => return Err(SandboxError::Setup(e)),
            Err(_) => {
                return Err(SandboxError::InvalidConfig(format!(
                    "`{} --version` did not finish",
                    self.config.interpreter
                )))
            }
        };
        // Python 2 prints the version on stderr.
        let banner = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        Ok(String::from_utf8_lossy(&banner).trim().to_string())
    }

    /// Validate and run the script at `script_path`.
    pub async fn run_script(&self, script_path: &Path) -> SandboxResult<ExecutionResult> {
        let started = Instant::now();
        let read_err = |source| SandboxError::ReadScript {
            path: script_path.to_path_buf(),
            source,
        };
        let source = tokio::fs::read_to_string(script_path)
            .await
            .map_err(read_err)?;

        if let Some(validator) = &self.validator {
            if let Err(err) = validator.validate(&source) {
                debug!(script = %script_path.display(), error = %err, "script rejected");
                return Ok(ExecutionResult::rejected(err.to_string(), elapsed_ms(started)));
            }
        }

        let script = tokio::fs::canonicalize(script_path)
            .await
            .map_err(read_err)?;
        let mut scratch = tempfile::Builder::new();
        scratch.prefix(SCRATCH_PREFIX);
        let scratch = match &self.config.scratch_root {
            Some(root) => scratch.tempdir_in(root),
            None => scratch.tempdir(),
        }
        .map_err(SandboxError::Setup)?;

        let mut cmd = Command::new(&self.config.interpreter);
        cmd.arg(&script)
            .current_dir(scratch.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env_clear();
        for key in INHERITED_ENV {
            if let Some(value) = std::env::var_os(key) {
                cmd.env(key, value);
            }
        }
        cmd.env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONDONTWRITEBYTECODE", "1");

        #[cfg(unix)]
        super::limits::apply(
            &mut cmd,
            super::limits::ChildLimits {
                max_open_files: self.config.max_open_files,
                max_address_space: self
                    .config
                    .enforce_memory_limit
                    .then(|| self.config.max_memory_mb.saturating_mul(1024 * 1024)),
            },
        );
        if !self.config.enforce_memory_limit {
            debug!(
                max_memory_mb = self.config.max_memory_mb,
                "memory ceiling is advisory"
            );
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SandboxError::InterpreterNotFound {
                    interpreter: self.config.interpreter.clone(),
                })
            }
            Err(e) => {
                warn!(error = %e, "failed to start script");
                return Ok(ExecutionResult::failed(
                    None,
                    format!("execution error: {e}"),
                    elapsed_ms(started),
                ));
            }
        };
        let pid = child.id();
        let deadline = Instant::now() + self.config.timeout;

        let stdout = Capture::default();
        let stderr = Capture::default();
        let readers = [
            tokio::spawn(read_capped(child.stdout.take(), stdout.clone())),
            tokio::spawn(read_capped(child.stderr.take(), stderr.clone())),
        ];

        let status = match tokio::time::timeout(self.config.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                terminate(&mut child, pid).await;
                readers.iter().for_each(JoinHandle::abort);
                return Ok(ExecutionResult::failed(
                    None,
                    format!("execution error: {e}"),
                    elapsed_ms(started),
                ));
            }
            Err(_) => {
                terminate(&mut child, pid).await;
                readers.iter().for_each(JoinHandle::abort);
                debug!(script = %script.display(), "script timed out");
                return Ok(ExecutionResult::timed_out(
                    self.config.timeout,
                    elapsed_ms(started),
                ));
            }
        };

        // Reap anything the script left behind so the pipes reach EOF.
        #[cfg(unix)]
        if let Some(pid) = pid {
            super::limits::kill_process_group(pid);
        }

        // A descendant that left the process group can hold the pipes open
        // indefinitely; stop reading at the deadline and keep what arrived.
        let budget = deadline
            .saturating_duration_since(Instant::now())
            .max(DRAIN_GRACE);
        if !drain(readers, budget).await {
            warn!(script = %script.display(), "output still open after exit; capture cut short");
        }
        let stdout = stdout.take();
        let stderr = stderr.take();
        let duration_ms = elapsed_ms(started);

        if status.success() {
            return Ok(ExecutionResult::passed(duration_ms));
        }

        let stderr = String::from_utf8_lossy(&stderr);
        let stdout = String::from_utf8_lossy(&stdout);
        let diagnostic = if !stderr.trim().is_empty() {
            stderr.trim().to_string()
        } else if !stdout.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            describe_status(&status)
        };
        Ok(ExecutionResult::failed(status.code(), diagnostic, duration_ms))
    }
}

#[async_trait]
impl ScriptExecutor for SandboxRunner {
    async fn execute(&self, script_path: &Path) -> SandboxResult<ExecutionResult> {
        self.run_script(script_path).await
    }
}

async fn terminate(child: &mut tokio::process::Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        super::limits::kill_process_group(pid);
    }
    #[cfg(not(unix))]
    let _ = pid;
    if let Err(e) = child.kill().await {
        debug!(error = %e, "kill after timeout");
    }
}

/// Output collected from one stream, readable after the reader is aborted.
#[derive(Debug, Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn append(&self, bytes: &[u8]) {
        let mut kept = self.0.lock().unwrap_or_else(|e| e.into_inner());
        let room = MAX_CAPTURE_BYTES.saturating_sub(kept.len());
        kept.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// Drain `reader` to EOF into `sink`, keeping at most [`MAX_CAPTURE_BYTES`].
async fn read_capped<R>(reader: Option<R>, sink: Capture)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => sink.append(&chunk[..n]),
        }
    }
}

/// Wait up to `budget` for the readers to finish. Aborts them and returns
/// `false` when the budget runs out.
async fn drain(mut readers: [JoinHandle<()>; 2], budget: Duration) -> bool {
    let joined = tokio::time::timeout(budget, async {
        for reader in readers.iter_mut() {
            let _ = reader.await;
        }
    })
    .await
    .is_ok();
    if !joined {
        readers.iter().for_each(JoinHandle::abort);
    }
    joined
}

fn truncate_diagnostic(text: &str) -> String {
    if text.len() <= MAX_DIAGNOSTIC_BYTES {
        return text.to_string();
    }
    let mut cut = MAX_DIAGNOSTIC_BYTES;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n... [truncated]", &text[..cut])
}

fn describe_status(status: &std::process::ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("process exited with status {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("process terminated by signal {signal}");
        }
    }
    "process exited abnormally".to_string()
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_security_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.interpreter, "python3");
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.max_open_files, 16);
        assert!(config.validate);
        assert!(!config.enforce_memory_limit);
    }

    #[test]
    fn rejects_invalid_config() {
        let mut config = RunnerConfig::default();
        config.timeout = Duration::ZERO;
        assert!(matches!(
            SandboxRunner::new(config),
            Err(SandboxError::InvalidConfig(_))
        ));

        let mut config = RunnerConfig::default();
        config.interpreter = " ".into();
        assert!(SandboxRunner::new(config).is_err());
    }

    #[test]
    fn long_diagnostics_are_truncated_on_char_boundary() {
        let text = "é".repeat(MAX_DIAGNOSTIC_BYTES);
        let cut = truncate_diagnostic(&text);
        assert!(cut.ends_with("[truncated]"));
        assert!(cut.len() < text.len());

        assert_eq!(truncate_diagnostic("short"), "short");
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(ExecutionOutcome::TimedOut.label(), "timed_out");
        assert_eq!(
            ExecutionOutcome::Failed { exit_code: Some(1) }.label(),
            "failed"
        );
        let result = ExecutionResult::timed_out(Duration::from_secs(10), 10_000);
        assert_eq!(result.diagnostic, "execution timed out after 10s");
    }

    #[tokio::test]
    async fn rejected_script_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("bad.py");
        std::fs::write(&script, "import os\nos.system('true')\n").unwrap();

        // The interpreter does not exist: reaching spawn would fail loudly.
        let config = RunnerConfig {
            interpreter: "definitely-not-an-interpreter".into(),
            ..RunnerConfig::default()
        };
        let result = SandboxRunner::new(config)
            .unwrap()
            .run_script(&script)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.outcome, ExecutionOutcome::Rejected);
        assert!(result.diagnostic.contains("os"));
    }

    #[tokio::test]
    async fn missing_interpreter_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("ok.py");
        std::fs::write(&script, "print('hi')\n").unwrap();

        let runner = SandboxRunner::new(RunnerConfig {
            interpreter: "definitely-not-an-interpreter".into(),
            ..RunnerConfig::default()
        })
        .unwrap();
        assert!(matches!(
            runner.run_script(&script).await,
            Err(SandboxError::InterpreterNotFound { .. })
        ));
        assert!(matches!(
            runner.probe_interpreter().await,
            Err(SandboxError::InterpreterNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn missing_script_is_a_read_error() {
        let runner = SandboxRunner::new(RunnerConfig::default()).unwrap();
        let err = runner
            .run_script(Path::new("/no/such/script.py"))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::ReadScript { .. }));
    }

    #[test]
    fn outcome_serializes_with_kind_tag() {
        let failed = serde_json::to_value(ExecutionOutcome::Failed { exit_code: Some(1) }).unwrap();
        assert_eq!(
            failed,
            serde_json::json!({"kind": "failed", "exit_code": 1})
        );
        let timed_out = serde_json::to_value(ExecutionOutcome::TimedOut).unwrap();
        assert_eq!(timed_out, serde_json::json!({"kind": "timed_out"}));
    }
}

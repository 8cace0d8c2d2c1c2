//! Structured observability hooks for the artifact lifecycle.
//!
//! - Job-scoped tracing spans via [`job_span`]
//! - Emission functions for key events: detection, rejection, each execution
//!   attempt, repair requests and the final verdict

use std::path::Path;

use tracing::{info, warn, Span};

/// Span tagged with a job id for one artifact.
///
/// Attach it to the job future with [`tracing::Instrument`]; an entered span
/// guard cannot be held across `.await` in a `Send` future.
///
/// ```ignore
/// process(path).instrument(job_span(&job_id, path)).await
/// ```
pub fn job_span(job_id: &str, artifact: &Path) -> Span {
    tracing::info_span!(
        "autoleet.job",
        job_id = %job_id,
        artifact = %artifact.display()
    )
}

/// Emit event: a stable artifact was accepted for processing.
pub fn emit_artifact_detected(path: &Path, size_bytes: u64) {
    info!(event = "artifact.detected", path = %path.display(), size_bytes = size_bytes);
}

/// Emit event: the artifact failed pre-flight checks (warning level).
pub fn emit_artifact_rejected(path: &Path, reason: &dyn std::fmt::Display) {
    warn!(event = "artifact.rejected", path = %path.display(), reason = %reason);
}

/// Emit event: one execution attempt finished.
pub fn emit_attempt_finished(attempt: u32, success: bool, outcome: &str, duration_ms: u64) {
    info!(
        event = "attempt.finished",
        attempt = attempt,
        success = success,
        outcome = %outcome,
        duration_ms = duration_ms,
    );
}

/// Emit event: a repair was requested from the generator.
pub fn emit_repair_requested(attempt: u32, diagnostic_len: usize) {
    info!(event = "repair.requested", attempt = attempt, diagnostic_len = diagnostic_len);
}

/// Emit event: the generator failed to repair (warning level).
pub fn emit_repair_failed(attempt: u32, error: &dyn std::fmt::Display) {
    warn!(event = "repair.failed", attempt = attempt, error = %error);
}

/// Emit event: the job reached a final verdict.
pub fn emit_job_finished(output: &Path, succeeded: bool, attempts: u32, duration_ms: u64) {
    info!(
        event = "job.finished",
        output = %output.display(),
        succeeded = succeeded,
        attempts = attempts,
        duration_ms = duration_ms,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_span_enter_and_emit() {
        let span = job_span("job-1", Path::new("/tmp/two_sum.png"));
        let _guard = span.enter();
        emit_artifact_detected(Path::new("/tmp/two_sum.png"), 1024);
        emit_attempt_finished(1, false, "failed", 12);
        emit_repair_requested(1, 40);
        emit_repair_failed(1, &"timeout");
        emit_job_finished(Path::new("/tmp/out/Two_Sum.py"), false, 3, 900);
    }
}

//! AutoLeet Core Library
//!
//! Watches a drop directory for problem screenshots, asks a vision model for
//! a solution script, screens and runs that script in a bounded sandbox, and
//! repairs it through the model until it passes or the attempt budget runs
//! out.

pub mod artifact;
pub mod config;
pub mod error;
pub mod extract;
pub mod generator;
pub mod notifier;
pub mod obs;
pub mod paths;
pub mod pipeline;
pub mod repair;
pub mod sandbox;
pub mod telemetry;
pub mod watcher;

pub use artifact::{ArtifactKind, ArtifactPolicy, InputArtifact};
pub use config::{
    AppConfig, LlmConfig, LoggingConfig, NotifyConfig, PathsConfig, SecurityConfig, WatchConfig,
    DEFAULT_CONFIG_FILE, SUPPORTED_PROVIDERS,
};
pub use error::{AutoleetError, ProviderError, Result, ValidationError};
pub use extract::{extract_code, extract_script, extract_title, CandidateScript};
pub use generator::{
    repair_prompt, text_prompt, CodeGenerator, ConnectionReport, GenerationInput, DEFAULT_PROMPT,
    PING_PROMPT,
};
pub use notifier::{DesktopNotifier, NoopNotifier, Notifier};
pub use obs::{
    emit_artifact_detected, emit_artifact_rejected, emit_attempt_finished, emit_job_finished,
    emit_repair_failed, emit_repair_requested, job_span,
};
pub use paths::{output_stem, resolve_output_path, sanitize_title, SCRIPT_EXTENSION};
pub use pipeline::{ArtifactReport, PipelineController, PipelineSettings};
pub use repair::{
    AttemptRecord, RepairLoop, RepairOutcome, RepairReport, RepairState, MAX_ATTEMPTS,
};
pub use sandbox::{
    DenyList, ExecutionOutcome, ExecutionResult, RunnerConfig, SandboxError, SandboxRunner,
    ScriptExecutor, StaticValidator, SCRATCH_PREFIX,
};
pub use telemetry::init_tracing;
pub use watcher::{
    wait_for_stable_size, ArtifactHandler, InputWatcher, StabilityPolicy, WatchSettings,
    WatchState,
};

//! Per-artifact orchestration: inspect, generate, extract, place, repair,
//! persist, notify.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn, Instrument};

use crate::artifact::{ArtifactPolicy, InputArtifact};
use crate::config::AppConfig;
use crate::error::{AutoleetError, Result};
use crate::extract::extract_script;
use crate::generator::{text_prompt, CodeGenerator, GenerationInput, DEFAULT_PROMPT};
use crate::notifier::Notifier;
use crate::obs;
use crate::paths::resolve_output_path;
use crate::repair::{RepairLoop, RepairReport, MAX_ATTEMPTS};
use crate::sandbox::ScriptExecutor;
use crate::watcher::ArtifactHandler;

/// Static settings for a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub output_dir: PathBuf,
    pub prompt: String,
    pub policy: ArtifactPolicy,
    pub max_attempts: u32,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            output_dir: config.paths.output_dir.clone(),
            prompt: config
                .llm
                .prompt
                .clone()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
            policy: ArtifactPolicy::from(&config.security),
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

/// What happened to one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactReport {
    pub job_id: String,
    pub input: PathBuf,
    pub output_path: PathBuf,
    pub repair: RepairReport,
}

impl ArtifactReport {
    pub fn succeeded(&self) -> bool {
        self.repair.succeeded()
    }
}

/// Turns one input artifact into a tested script on disk.
pub struct PipelineController {
    settings: PipelineSettings,
    generator: Arc<dyn CodeGenerator>,
    executor: Arc<dyn ScriptExecutor>,
    notifier: Arc<dyn Notifier>,
}

impl PipelineController {
    pub fn new(
        settings: PipelineSettings,
        generator: Arc<dyn CodeGenerator>,
        executor: Arc<dyn ScriptExecutor>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            settings,
            generator,
            executor,
            notifier,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run the full pipeline for `path`.
    ///
    /// A script that never passes is still `Ok`; check
    /// [`ArtifactReport::succeeded`]. `Err` means the artifact could not be
    /// processed at all.
    pub async fn process(&self, path: &Path) -> Result<ArtifactReport> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let span = obs::job_span(&job_id, path);
        self.process_job(job_id, path).instrument(span).await
    }

    async fn process_job(&self, job_id: String, path: &Path) -> Result<ArtifactReport> {
        let started = Instant::now();

        let artifact = InputArtifact::inspect(path, &self.settings.policy).map_err(|e| {
            obs::emit_artifact_rejected(path, &e);
            e
        })?;
        obs::emit_artifact_detected(&artifact.path, artifact.size_bytes);

        let input = artifact.load().await?;
        let prompt = match &input {
            GenerationInput::Text(problem) => text_prompt(&self.settings.prompt, problem),
            GenerationInput::Image { .. } => self.settings.prompt.clone(),
        };
        info!(
            provider = self.generator.provider(),
            model = self.generator.model(),
            "requesting solution"
        );
        let response = self.generator.generate(&input, &prompt).await?;

        let script = extract_script(&response);
        if script.code.is_empty() {
            warn!("generator reply contained no code");
        }
        info!(title = script.display_title(), "solution generated");

        tokio::fs::create_dir_all(&self.settings.output_dir)
            .await
            .map_err(|e| {
                AutoleetError::FileHandling(format!(
                    "cannot create {}: {e}",
                    self.settings.output_dir.display()
                ))
            })?;
        let output_dir = tokio::fs::canonicalize(&self.settings.output_dir).await?;
        let output_path = resolve_output_path(&output_dir, script.title.as_deref(), path)?;
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let repair = RepairLoop::new(self.executor.as_ref(), self.generator.as_ref())
            .with_max_attempts(self.settings.max_attempts)
            .run(&output_path, script)
            .await?;

        // Persist the reported script.
        tokio::fs::write(&output_path, &repair.script.code)
            .await
            .map_err(|e| {
                AutoleetError::FileHandling(format!("cannot write {}: {e}", output_path.display()))
            })?;

        obs::emit_job_finished(
            &output_path,
            repair.succeeded(),
            repair.attempts_used(),
            started.elapsed().as_millis() as u64,
        );

        if repair.succeeded() {
            self.notifier
                .notify_success(&repair.script, &output_path)
                .await;
        } else {
            warn!(
                output = %output_path.display(),
                attempts = repair.attempts_used(),
                diagnostic = repair.last_diagnostic().unwrap_or(""),
                "no passing solution; last attempt kept on disk"
            );
        }

        Ok(ArtifactReport {
            job_id,
            input: path.to_path_buf(),
            output_path,
            repair,
        })
    }
}

#[async_trait]
impl ArtifactHandler for PipelineController {
    async fn handle(&self, path: &Path) -> Result<()> {
        match self.process(path).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                error!(path = %path.display(), error = %e, "artifact failed");
                Ok(())
            }
        }
    }
}

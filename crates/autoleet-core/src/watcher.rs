//! Input watcher: turns noisy file-system events into one job at a time.
//!
//! Two gates stand between an event and the pipeline:
//!
//! 1. **Cooldown**: ignore the event while a job is processing, or when the
//!    previous accepted event was less than `cooldown` ago.
//! 2. **Stability**: poll the file size until it is nonzero and unchanged
//!    for consecutive polls, bounded by `max_wait`. A file that never settles
//!    is handed over anyway.
//!
//! Jobs run inline on the watch task, so events queued during a job are
//! drained and dropped when it finishes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::artifact::normalized_extension;
use crate::config::AppConfig;
use crate::error::{AutoleetError, Result};

/// Receives each accepted artifact.
///
/// Implementations swallow per-artifact failures and return `Err` only for
/// fatal ones, which stop the watcher.
#[async_trait]
pub trait ArtifactHandler: Send + Sync {
    async fn handle(&self, path: &Path) -> Result<()>;
}

/// Debounce state, owned by [`InputWatcher`].
#[derive(Debug, Clone)]
pub struct WatchState {
    last_processed: Option<Instant>,
    processing: bool,
    cooldown: Duration,
}

impl WatchState {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            last_processed: None,
            processing: false,
            cooldown,
        }
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn last_processed(&self) -> Option<Instant> {
        self.last_processed
    }

    /// Whether an event observed at `now` passes the cooldown gate.
    pub fn should_accept(&self, now: Instant) -> bool {
        if self.processing {
            return false;
        }
        match self.last_processed {
            Some(last) => now.saturating_duration_since(last) >= self.cooldown,
            None => true,
        }
    }

    /// Mark a job as started at `now`. The flag clears when the guard drops.
    pub fn begin(&mut self, now: Instant) -> ProcessingGuard<'_> {
        self.processing = true;
        self.last_processed = Some(now);
        ProcessingGuard { state: self }
    }
}

/// Clears [`WatchState::is_processing`] on every exit path.
#[derive(Debug)]
pub struct ProcessingGuard<'a> {
    state: &'a mut WatchState,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.state.processing = false;
    }
}

/// How long to wait for a file to stop growing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
    /// Consecutive polls with the same nonzero size.
    pub required_stable_polls: u32,
}

impl Default for StabilityPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            max_wait: Duration::from_secs(5),
            required_stable_polls: 2,
        }
    }
}

/// Poll `path` until its size settles. Returns whether it did in time.
pub async fn wait_for_stable_size(path: &Path, policy: &StabilityPolicy) -> bool {
    let deadline = Instant::now() + policy.max_wait;
    let mut last_size: Option<u64> = None;
    let mut stable = 0u32;

    loop {
        match tokio::fs::metadata(path).await {
            Ok(meta) => {
                let size = meta.len();
                if size > 0 && last_size == Some(size) {
                    stable += 1;
                    if stable >= policy.required_stable_polls {
                        return true;
                    }
                } else {
                    stable = 0;
                }
                last_size = Some(size);
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "size poll failed");
                stable = 0;
                last_size = None;
            }
        }

        if Instant::now() + policy.interval > deadline {
            return false;
        }
        tokio::time::sleep(policy.interval).await;
    }
}

/// Settings for one watcher.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchSettings {
    pub source_dir: PathBuf,
    /// Lower-cased, with leading dot.
    pub allowed_extensions: Vec<String>,
    pub cooldown: Duration,
    pub stability: StabilityPolicy,
}

impl WatchSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            source_dir: config.paths.source_dir.clone(),
            allowed_extensions: config
                .security
                .allowed_extensions
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
            cooldown: config.watch.cooldown(),
            stability: StabilityPolicy {
                interval: Duration::from_millis(config.watch.stability_interval_ms),
                max_wait: Duration::from_millis(config.watch.stability_max_wait_ms),
                required_stable_polls: 2,
            },
        }
    }
}

/// Live subscription to the source directory. Dropping it stops watching.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
    pub events: UnboundedReceiver<notify::Result<Event>>,
}

/// Watches one directory, non-recursively.
#[derive(Debug)]
pub struct InputWatcher {
    settings: WatchSettings,
    state: WatchState,
}

impl InputWatcher {
    pub fn new(settings: WatchSettings) -> Self {
        let state = WatchState::new(settings.cooldown);
        Self { settings, state }
    }

    pub fn settings(&self) -> &WatchSettings {
        &self.settings
    }

    pub fn state(&self) -> &WatchState {
        &self.state
    }

    /// Subscribe to the source directory.
    ///
    /// Fails with [`AutoleetError::DirectoryNotFound`] before any watching
    /// starts when the directory is missing.
    pub fn start(&self) -> Result<WatchHandle> {
        let dir = &self.settings.source_dir;
        if !dir.is_dir() {
            return Err(AutoleetError::DirectoryNotFound(dir.clone()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                let _ = tx.send(result);
            },
            notify::Config::default(),
        )?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        Ok(WatchHandle {
            _watcher: watcher,
            events: rx,
        })
    }

    /// Watch until the event stream ends or the handler reports a fatal error.
    ///
    /// Cancel by dropping the future.
    pub async fn run<H>(&mut self, handler: &H) -> Result<()>
    where
        H: ArtifactHandler + ?Sized,
    {
        let mut handle = self.start()?;
        info!(
            dir = %self.settings.source_dir.display(),
            extensions = ?self.settings.allowed_extensions,
            "watching for new files"
        );

        while let Some(result) = handle.events.recv().await {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "watch back-end error");
                    continue;
                }
            };
            if !is_creation(&event.kind) {
                continue;
            }
            let mut processed = false;
            for path in &event.paths {
                processed |= self.offer(path, handler).await?;
            }
            if processed {
                let mut dropped = 0usize;
                while handle.events.try_recv().is_ok() {
                    dropped += 1;
                }
                if dropped > 0 {
                    debug!(dropped, "ignored events that arrived while processing");
                }
            }
        }
        Ok(())
    }

    /// Whether `path` is a file this watcher cares about.
    pub fn is_candidate(&self, path: &Path) -> bool {
        if !path.is_file() {
            return false;
        }
        let ext = normalized_extension(path);
        self.settings.allowed_extensions.iter().any(|e| *e == ext)
    }

    /// Run `path` through both gates and, if it passes, through `handler`.
    ///
    /// Returns whether the handler ran.
    pub async fn offer<H>(&mut self, path: &Path, handler: &H) -> Result<bool>
    where
        H: ArtifactHandler + ?Sized,
    {
        if !self.is_candidate(path) {
            return Ok(false);
        }
        let now = Instant::now();
        if !self.state.should_accept(now) {
            debug!(path = %path.display(), "ignored during cooldown");
            return Ok(false);
        }

        let stability = self.settings.stability;
        let _guard = self.state.begin(now);
        info!(path = %path.display(), "new file detected");
        if !wait_for_stable_size(path, &stability).await {
            warn!(path = %path.display(), "file size did not settle; processing anyway");
        }
        handler.handle(path).await?;
        Ok(true)
    }
}

fn is_creation(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To))
    )
}

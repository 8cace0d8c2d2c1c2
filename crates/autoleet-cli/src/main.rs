//! AutoLeet CLI
//!
//! The `autoleet` command turns problem screenshots into tested solutions.
//!
//! ## Commands
//!
//! - `watch`: watch the source directory and process new screenshots (default)
//! - `solve`: process one screenshot or problem text immediately
//! - `check`: run the static safety checks on a script
//! - `verify`: confirm the configured model provider is reachable

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use autoleet_core::{
    init_tracing, AppConfig, ArtifactReport, ConnectionReport, DesktopNotifier, InputWatcher,
    PipelineController, PipelineSettings, RunnerConfig, SandboxRunner, StaticValidator,
    WatchSettings, DEFAULT_CONFIG_FILE, SCRATCH_PREFIX,
};
use autoleet_providers::create_generator;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn, Level};

/// Exit status of `verify` when the configuration file is missing.
const EXIT_MISSING_CONFIG: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "autoleet")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Screenshot-to-solution pipeline with sandboxed testing", long_about = None)]
struct Cli {
    /// Configuration file (default: ./autoleet.toml when present)
    #[arg(long, global = true, env = "AUTOLEET_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Watch the source directory and process each new screenshot
    Watch,

    /// Process a single screenshot or problem text file
    Solve {
        /// Screenshot, or .txt/.md problem text when listed in security.allowed_extensions
        file: PathBuf,
    },

    /// Run the static safety checks on a Python script
    Check {
        /// Script to check
        script: PathBuf,
    },

    /// Check that the configured model provider answers
    Verify {
        /// Provider to test instead of the configured one
        #[arg(long)]
        provider: Option<String>,

        /// API key to test instead of the configured one
        #[arg(long)]
        api_key: Option<String>,

        /// Model to test instead of the configured one
        #[arg(long)]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Watch) {
        Commands::Watch => {
            let config = load_config(cli.config.as_deref())?;
            setup_logging(&config, cli.verbose, cli.json)?;
            cmd_watch(config).await
        }
        Commands::Solve { file } => {
            let config = load_config(cli.config.as_deref())?;
            setup_logging(&config, cli.verbose, cli.json)?;
            cmd_solve(config, &file, cli.json).await
        }
        Commands::Check { script } => {
            let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
            init_tracing(cli.json, level, None)?;
            cmd_check(&script)
        }
        Commands::Verify {
            provider,
            api_key,
            model,
        } => {
            if let Some(path) = cli.config.as_deref() {
                if !path.is_file() {
                    eprintln!("Config file not found: {}", path.display());
                    return Ok(ExitCode::from(EXIT_MISSING_CONFIG));
                }
            }
            let mut config = load_config(cli.config.as_deref())?;
            setup_logging(&config, cli.verbose, cli.json)?;
            if let Some(provider) = provider {
                config.llm.provider = provider;
            }
            if let Some(api_key) = api_key {
                config.llm.api_key = Some(api_key);
            }
            if let Some(model) = model {
                config.llm.model = model;
            }
            cmd_verify(&config, cli.verbose, cli.json).await
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = AppConfig::load(path).context("Failed to load configuration")?;
    if path.is_none() && !Path::new(DEFAULT_CONFIG_FILE).is_file() {
        // Nothing on disk; defaults plus environment only.
        eprintln!("No {DEFAULT_CONFIG_FILE} found, using defaults and environment");
    }
    Ok(config)
}

fn setup_logging(config: &AppConfig, verbose: bool, json: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config.logging.level().unwrap_or(Level::INFO)
    };
    init_tracing(
        json || config.logging.json,
        level,
        config.logging.file.as_deref(),
    )
    .context("Failed to open log file")
}

fn runner_config(config: &AppConfig) -> RunnerConfig {
    RunnerConfig {
        scratch_root: config.paths.temp_dir.clone(),
        ..RunnerConfig::from(&config.security)
    }
}

/// Build everything a pipeline needs, failing fast on fatal problems.
async fn build_controller(config: &AppConfig) -> Result<PipelineController> {
    config.ensure_valid()?;

    tokio::fs::create_dir_all(&config.paths.output_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create output directory {}",
                config.paths.output_dir.display()
            )
        })?;
    if let Some(temp_dir) = &config.paths.temp_dir {
        reset_temp_dir(config, temp_dir).await?;
    }

    let runner = SandboxRunner::new(runner_config(config))?;
    let version = runner.probe_interpreter().await?;
    info!(
        interpreter = %config.security.interpreter,
        version = %version,
        "interpreter ready"
    );

    let generator = create_generator(&config.llm)?;
    info!(
        provider = generator.provider(),
        model = generator.model(),
        api_key = %config.llm.masked_api_key(),
        "generator ready"
    );

    Ok(PipelineController::new(
        PipelineSettings::from_config(config),
        generator,
        Arc::new(runner),
        Arc::new(DesktopNotifier::new(config.notify.clone())),
    ))
}

/// Remove scratch directories left by earlier runs from `temp_dir`.
///
/// Only `autoleet-run-*` entries are deleted. Refuses a `temp_dir` that is, or
/// contains, the source or output directory.
async fn reset_temp_dir(config: &AppConfig, temp_dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(temp_dir)
        .await
        .with_context(|| format!("Failed to create temp directory {}", temp_dir.display()))?;
    let temp = resolve_dir(temp_dir)?;
    for guarded in [&config.paths.source_dir, &config.paths.output_dir] {
        if resolve_dir(guarded)?.starts_with(&temp) {
            anyhow::bail!(
                "temp_dir {} must not be or contain {}",
                temp_dir.display(),
                guarded.display()
            );
        }
    }

    let mut entries = tokio::fs::read_dir(&temp)
        .await
        .with_context(|| format!("Failed to read temp directory {}", temp.display()))?;
    let mut removed = 0usize;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_name().to_string_lossy().starts_with(SCRATCH_PREFIX) {
            continue;
        }
        let path = entry.path();
        let result = if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        result.with_context(|| format!("Failed to remove {}", path.display()))?;
        removed += 1;
    }
    if removed > 0 {
        info!(dir = %temp.display(), removed, "cleared stale scratch directories");
    }
    Ok(())
}

/// Canonical form of `path`, or its absolute form when it does not exist yet.
fn resolve_dir(path: &Path) -> Result<PathBuf> {
    match std::fs::canonicalize(path) {
        Ok(resolved) => Ok(resolved),
        Err(_) => std::path::absolute(path)
            .with_context(|| format!("Failed to resolve {}", path.display())),
    }
}

async fn cmd_watch(config: AppConfig) -> Result<ExitCode> {
    let controller = build_controller(&config).await?;
    let mut watcher = InputWatcher::new(WatchSettings::from_config(&config));

    println!(
        "Watching {} (solutions go to {}). Press Ctrl-C to stop.",
        config.paths.source_dir.display(),
        config.paths.output_dir.display()
    );

    tokio::select! {
        result = watcher.run(&controller) => {
            result?;
            warn!("watch stream ended");
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("interrupted, shutting down");
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_solve(config: AppConfig, file: &Path, json: bool) -> Result<ExitCode> {
    let controller = build_controller(&config).await?;
    let report = controller
        .process(file)
        .await
        .with_context(|| format!("Failed to process {}", file.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_report(report: &ArtifactReport) {
    let status = if report.succeeded() {
        "passed"
    } else {
        "failed"
    };
    println!("Job:      {}", report.job_id);
    println!("Problem:  {}", report.repair.script.display_title());
    println!("Output:   {}", report.output_path.display());
    println!(
        "Result:   {} after {} attempt(s)",
        status,
        report.repair.attempts_used()
    );
    for attempt in &report.repair.attempts {
        println!(
            "  #{} {:<9} {:>6} ms  {}",
            attempt.attempt,
            attempt.outcome.label(),
            attempt.duration_ms,
            &attempt.script_digest[..12.min(attempt.script_digest.len())]
        );
    }
    if !report.succeeded() {
        if let Some(diagnostic) = report.repair.last_diagnostic() {
            println!();
            println!("Last error:");
            for line in diagnostic.lines() {
                println!("    {line}");
            }
        }
        if let Some(err) = &report.repair.repair_error {
            println!("Repair stopped: {err}");
        }
    }
}

fn cmd_check(script: &Path) -> Result<ExitCode> {
    Ok(if check_file(script)? {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Print the verdict for `script`; returns whether it was accepted.
fn check_file(script: &Path) -> Result<bool> {
    let source = std::fs::read_to_string(script)
        .with_context(|| format!("Failed to read {}", script.display()))?;
    match check_source(&source) {
        Ok(()) => {
            println!("{}: accepted", script.display());
            Ok(true)
        }
        Err(reason) => {
            println!("{}: rejected: {reason}", script.display());
            Ok(false)
        }
    }
}

fn check_source(source: &str) -> std::result::Result<(), String> {
    StaticValidator::new()
        .validate(source)
        .map_err(|e| e.to_string())
}

#[derive(Debug, Serialize)]
struct VerifyOutput<'a> {
    provider: &'a str,
    model: &'a str,
    api_key: String,
    base_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    connection: Option<ConnectionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn cmd_verify(config: &AppConfig, verbose: bool, json: bool) -> Result<ExitCode> {
    let mut output = VerifyOutput {
        provider: &config.llm.provider,
        model: &config.llm.model,
        api_key: config.llm.masked_api_key(),
        base_url: config.llm.base_url.as_deref(),
        connection: None,
        error: None,
    };

    match create_generator(&config.llm) {
        Ok(generator) => output.connection = Some(generator.check_connection().await),
        Err(e) => output.error = Some(e.to_string()),
    }
    let success = output.connection.as_ref().is_some_and(|c| c.success);

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_verify(&output, config, verbose);
    }
    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_verify(output: &VerifyOutput<'_>, config: &AppConfig, verbose: bool) {
    println!("Provider: {}", output.provider);
    println!("Model:    {}", output.model);
    println!("API key:  {}", output.api_key);
    if verbose {
        println!("Base URL: {}", output.base_url.unwrap_or("(default)"));
        println!("Timeout:  {}s", config.llm.request_timeout_secs);
    }
    if let Some(err) = &output.error {
        println!("FAILED: {err}");
    }
    if let Some(report) = &output.connection {
        let verdict = if report.success { "OK" } else { "FAILED" };
        println!("{verdict} ({} ms): {}", report.latency_ms, report.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn watch_is_the_default() {
        let cli = Cli::try_parse_from(["autoleet"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.verbose);

        let cli = Cli::try_parse_from(["autoleet", "--json", "watch"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Watch));
        assert!(cli.json);
    }

    #[test]
    fn verify_overrides_parse() {
        let cli = Cli::try_parse_from([
            "autoleet",
            "verify",
            "--provider",
            "ollama",
            "--model",
            "llava",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(
            cli.command,
            Some(Commands::Verify {
                provider: Some("ollama".into()),
                api_key: None,
                model: Some("llava".into()),
            })
        );
    }

    #[test]
    fn global_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["autoleet", "solve", "shot.png", "--config", "x.toml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert_eq!(
            cli.command,
            Some(Commands::Solve {
                file: PathBuf::from("shot.png")
            })
        );
    }

    #[test]
    fn check_source_accepts_and_rejects() {
        assert!(check_source("print(sum([1, 2]))\n").is_ok());
        let reason = check_source("import subprocess\n").unwrap_err();
        assert!(reason.contains("subprocess"), "{reason}");
    }

    #[test]
    fn check_file_verdicts() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.py");
        std::fs::write(&good, "def f(x):\n    return x\n").unwrap();
        let bad = dir.path().join("bad.py");
        std::fs::write(&bad, "eval('1')\n").unwrap();

        assert!(check_file(&good).unwrap());
        assert!(!check_file(&bad).unwrap());
        assert!(check_file(&dir.path().join("missing.py")).is_err());
    }

    #[test]
    fn runner_uses_configured_temp_dir() {
        let mut config = AppConfig::default();
        config.paths.temp_dir = Some(PathBuf::from("/tmp/autoleet-scratch"));
        let runner = runner_config(&config);
        assert_eq!(runner.scratch_root, config.paths.temp_dir);
        assert_eq!(runner.interpreter, config.security.interpreter);
    }

    #[tokio::test]
    async fn temp_dir_reset_removes_only_scratch_entries() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("tmp");
        std::fs::create_dir_all(temp.join(format!("{SCRATCH_PREFIX}old/nested"))).unwrap();
        std::fs::write(temp.join("notes.txt"), "keep me").unwrap();

        let config = AppConfig::default();
        reset_temp_dir(&config, &temp).await.unwrap();
        assert!(temp.join("notes.txt").is_file());
        assert!(!temp.join(format!("{SCRATCH_PREFIX}old")).exists());

        let fresh = dir.path().join("fresh");
        reset_temp_dir(&config, &fresh).await.unwrap();
        assert!(fresh.is_dir());
    }

    #[tokio::test]
    async fn temp_dir_containing_output_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let desktop = dir.path().join("Desktop");
        let solutions = desktop.join("solutions");
        std::fs::create_dir_all(&solutions).unwrap();
        std::fs::write(solutions.join("two_sum.py"), "print(1)").unwrap();

        let mut config = AppConfig::default();
        config.paths.output_dir = solutions.clone();
        assert!(reset_temp_dir(&config, &desktop).await.is_err());
        assert!(solutions.join("two_sum.py").is_file());

        // Same directory spelled differently.
        let mut config = AppConfig::default();
        config.paths.output_dir = solutions.clone();
        let dotted = desktop.join(".").join("solutions");
        assert!(reset_temp_dir(&config, &dotted).await.is_err());
        assert!(solutions.join("two_sum.py").is_file());
    }
}

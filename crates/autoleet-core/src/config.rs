//! Application configuration.
//!
//! Loaded from a TOML file, then overridden from the environment. Every field
//! has a default so a partial file (or no file at all) is valid input;
//! [`AppConfig::validate`] reports everything that is still wrong in one pass.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::error::{AutoleetError, Result};

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "autoleet.toml";

/// Provider names accepted by `llm.provider`.
pub const SUPPORTED_PROVIDERS: &[&str] = &["gemini", "openai", "anthropic", "ollama", "zhipu"];

const PLACEHOLDER_KEYS: &[&str] = &["your_api_key_here", "your-api-key", "changeme", "xxx"];

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub llm: LlmConfig,
    pub security: SecurityConfig,
    pub watch: WatchConfig,
    pub logging: LoggingConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory watched for new screenshots.
    pub source_dir: PathBuf,
    /// Directory solutions are written to.
    pub output_dir: PathBuf,
    /// Scratch directory removed at startup when present.
    pub temp_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("screenshots"),
            output_dir: PathBuf::from("solutions"),
            temp_dir: None,
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: Option<String>,
    /// Overrides the built-in generation prompt.
    pub prompt: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            api_key: None,
            model: "gemini-2.5-flash".to_string(),
            base_url: None,
            prompt: None,
            request_timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    /// Provider name normalised for matching.
    pub fn provider_name(&self) -> String {
        self.provider.trim().to_lowercase()
    }

    /// Whether the configured provider runs without credentials.
    pub fn is_keyless(&self) -> bool {
        self.provider_name() == "ollama"
    }

    /// API key with everything but the edges hidden, for display.
    pub fn masked_api_key(&self) -> String {
        match self.api_key.as_deref() {
            None | Some("") => "<unset>".to_string(),
            Some(key) if key.chars().count() <= 8 => "****".to_string(),
            Some(key) => {
                let head: String = key.chars().take(4).collect();
                let tail: String = key
                    .chars()
                    .rev()
                    .take(4)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect();
                format!("{head}...{tail}")
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("api_key", &self.masked_api_key())
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("prompt", &self.prompt.as_ref().map(|_| "<custom>"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Wall-clock limit for one script execution.
    pub code_timeout_secs: u64,
    /// Memory ceiling in MiB. Advisory unless `enforce_memory_limit` is set.
    pub max_memory_mb: u64,
    pub enforce_memory_limit: bool,
    pub enable_ast_validation: bool,
    /// Lower-cased extensions with a leading dot.
    pub allowed_extensions: Vec<String>,
    pub max_file_size_mb: u64,
    /// Soft `RLIMIT_NOFILE` for child processes.
    pub max_open_files: u64,
    pub interpreter: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            code_timeout_secs: 10,
            max_memory_mb: 100,
            enforce_memory_limit: false,
            enable_ast_validation: true,
            allowed_extensions: vec![".png".into(), ".jpg".into(), ".jpeg".into()],
            max_file_size_mb: 10,
            max_open_files: 16,
            interpreter: "python3".to_string(),
        }
    }
}

impl SecurityConfig {
    pub fn code_timeout(&self) -> Duration {
        Duration::from_secs(self.code_timeout_secs)
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub cooldown_secs: f64,
    pub stability_interval_ms: u64,
    pub stability_max_wait_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 2.0,
            stability_interval_ms: 500,
            stability_max_wait_ms: 5000,
        }
    }
}

impl WatchConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_secs.max(0.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Parsed level, `None` when the configured string is not a level name.
    pub fn level(&self) -> Option<Level> {
        self.level.trim().parse::<Level>().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub clipboard: bool,
    pub sound: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            clipboard: true,
            sound: true,
        }
    }
}

impl AppConfig {
    /// Parse a TOML document. Missing sections fall back to defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| AutoleetError::Configuration(e.to_string()))
    }

    /// Load from `path`, or from [`DEFAULT_CONFIG_FILE`] when it exists, then
    /// apply environment overrides.
    ///
    /// An explicit path that does not exist is an error; a missing default
    /// file is not.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    AutoleetError::Configuration(format!(
                        "cannot read config file {}: {e}",
                        path.display()
                    ))
                })?;
                Self::from_toml_str(&text)?
            }
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    let text = std::fs::read_to_string(default)?;
                    Self::from_toml_str(&text)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.expand_paths();
        Ok(config)
    }

    /// Apply overrides using `lookup` as the environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("AUTOLEET_SOURCE_DIR") {
            self.paths.source_dir = PathBuf::from(v);
        }
        if let Some(v) = get("AUTOLEET_OUTPUT_DIR") {
            self.paths.output_dir = PathBuf::from(v);
        }
        if let Some(v) = get("AUTOLEET_TEMP_DIR") {
            self.paths.temp_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Some(v) = get("LLM_API_KEY").or_else(|| get("GEMINI_API_KEY")) {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("LLM_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Some(v) = get("AUTOLEET_TIMEOUT") {
            self.security.code_timeout_secs = parse_number("AUTOLEET_TIMEOUT", &v)?;
        }
        if let Some(v) = get("AUTOLEET_MAX_MEMORY") {
            self.security.max_memory_mb = parse_number("AUTOLEET_MAX_MEMORY", &v)?;
        }
        if let Some(v) = get("AUTOLEET_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = get("AUTOLEET_LOG_FILE") {
            self.logging.file = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Expand a leading `~` in every configured path.
    pub fn expand_paths(&mut self) {
        self.paths.source_dir = expand_home(&self.paths.source_dir);
        self.paths.output_dir = expand_home(&self.paths.output_dir);
        self.paths.temp_dir = self.paths.temp_dir.as_deref().map(expand_home);
        self.logging.file = self.logging.file.as_deref().map(expand_home);
    }

    /// Collect every configuration problem.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.paths.source_dir.as_os_str().is_empty() {
            problems.push("paths.source_dir is empty".to_string());
        }
        if self.paths.output_dir.as_os_str().is_empty() {
            problems.push("paths.output_dir is empty".to_string());
        }

        let provider = self.llm.provider_name();
        if provider.is_empty() {
            problems.push("llm.provider is empty".to_string());
        } else if !SUPPORTED_PROVIDERS.contains(&provider.as_str()) {
            problems.push(format!(
                "llm.provider `{}` is not one of: {}",
                self.llm.provider,
                SUPPORTED_PROVIDERS.join(", ")
            ));
        }
        if self.llm.model.trim().is_empty() {
            problems.push("llm.model is empty".to_string());
        }
        if !self.llm.is_keyless() {
            match self.llm.api_key.as_deref().map(str::trim) {
                None | Some("") => problems.push(format!("llm.api_key is required for {provider}")),
                Some(key) if PLACEHOLDER_KEYS.contains(&key.to_lowercase().as_str()) => {
                    problems.push("llm.api_key is still a placeholder".to_string())
                }
                _ => {}
            }
        }
        if self.llm.request_timeout_secs == 0 {
            problems.push("llm.request_timeout_secs must be positive".to_string());
        }

        let sec = &self.security;
        if sec.code_timeout_secs == 0 || sec.code_timeout_secs > 60 {
            problems.push(format!(
                "security.code_timeout_secs must be in 1..=60, got {}",
                sec.code_timeout_secs
            ));
        }
        if sec.max_memory_mb == 0 {
            problems.push("security.max_memory_mb must be positive".to_string());
        }
        if sec.max_file_size_mb == 0 {
            problems.push("security.max_file_size_mb must be positive".to_string());
        }
        if sec.allowed_extensions.is_empty() {
            problems.push("security.allowed_extensions is empty".to_string());
        }
        for ext in &sec.allowed_extensions {
            if !ext.starts_with('.') || ext.len() < 2 {
                problems.push(format!(
                    "security.allowed_extensions entry `{ext}` must look like `.png`"
                ));
            }
        }
        if sec.max_open_files < 3 {
            problems.push("security.max_open_files must be at least 3".to_string());
        }
        if sec.interpreter.trim().is_empty() {
            problems.push("security.interpreter is empty".to_string());
        }

        if self.logging.level().is_none() {
            problems.push(format!("logging.level `{}` is not a level", self.logging.level));
        }
        if !self.watch.cooldown_secs.is_finite() || self.watch.cooldown_secs < 0.0 {
            problems.push("watch.cooldown_secs must be a non-negative number".to_string());
        }
        if self.watch.stability_interval_ms == 0 {
            problems.push("watch.stability_interval_ms must be positive".to_string());
        }

        problems
    }

    /// Fail with [`AutoleetError::Configuration`] when [`validate`](Self::validate) finds problems.
    pub fn ensure_valid(&self) -> Result<()> {
        let problems = self.validate();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(AutoleetError::Configuration(problems.join("; ")))
        }
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value.trim().parse::<u64>().map_err(|_| {
        AutoleetError::Configuration(format!("{key} must be a non-negative integer, got `{value}`"))
    })
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid() -> AppConfig {
        let mut config = AppConfig::default();
        config.llm.api_key = Some("sk-test-0123456789".to_string());
        config
    }

    #[test]
    fn defaults_need_only_a_key() {
        assert!(!AppConfig::default().validate().is_empty());
        assert!(valid().validate().is_empty(), "{:?}", valid().validate());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [paths]
            source_dir = "/tmp/shots"

            [security]
            code_timeout_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.paths.source_dir, PathBuf::from("/tmp/shots"));
        assert_eq!(config.paths.output_dir, PathBuf::from("solutions"));
        assert_eq!(config.security.code_timeout_secs, 5);
        assert_eq!(config.security.max_open_files, 16);
        assert_eq!(config.llm.provider, "gemini");
    }

    #[test]
    fn malformed_toml_is_configuration_error() {
        let err = AppConfig::from_toml_str("[security\ncode_timeout_secs = ").unwrap_err();
        assert!(matches!(err, AutoleetError::Configuration(_)));
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("LLM_PROVIDER", "openai"),
            ("LLM_API_KEY", "sk-env"),
            ("LLM_MODEL", "gpt-4o"),
            ("AUTOLEET_TIMEOUT", "7"),
            ("AUTOLEET_OUTPUT_DIR", "/tmp/out"),
            ("AUTOLEET_LOG_LEVEL", ""),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.security.code_timeout_secs, 7);
        assert_eq!(config.paths.output_dir, PathBuf::from("/tmp/out"));
        // Blank values are ignored.
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn gemini_key_fallback() {
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(|k| (k == "GEMINI_API_KEY").then(|| "g-key".to_string()))
            .unwrap();
        assert_eq!(config.llm.api_key.as_deref(), Some("g-key"));
    }

    #[test]
    fn bad_numeric_override_is_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env_overrides(|k| (k == "AUTOLEET_TIMEOUT").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("AUTOLEET_TIMEOUT"));
    }

    #[test]
    fn validate_reports_every_problem() {
        let mut config = valid();
        config.security.code_timeout_secs = 61;
        config.security.allowed_extensions = vec!["png".into()];
        config.logging.level = "loud".into();
        config.llm.provider = "mystery".into();

        let problems = config.validate();
        assert_eq!(problems.len(), 4, "{problems:?}");
        assert!(config.ensure_valid().is_err());
    }

    #[test]
    fn ollama_needs_no_key() {
        let mut config = AppConfig::default();
        config.llm.provider = "Ollama".into();
        assert!(config.validate().is_empty());
    }

    #[test]
    fn placeholder_key_rejected() {
        let mut config = AppConfig::default();
        config.llm.api_key = Some("your_api_key_here".into());
        assert_eq!(config.validate().len(), 1);
    }

    #[test]
    fn debug_masks_api_key() {
        let config = valid();
        let rendered = format!("{:?}", config.llm);
        assert!(!rendered.contains("sk-test-0123456789"));
        assert!(rendered.contains("sk-t...6789"));
    }

    #[test]
    fn explicit_missing_file_fails() {
        let err = AppConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, AutoleetError::Configuration(_)));
    }

    #[test]
    fn home_expansion() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(Path::new("~/shots")), home.join("shots"));
        }
        assert_eq!(expand_home(Path::new("/abs")), PathBuf::from("/abs"));
    }
}

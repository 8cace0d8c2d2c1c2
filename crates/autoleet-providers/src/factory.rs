//! Provider selection from configuration.

use std::sync::Arc;

use autoleet_core::{AutoleetError, CodeGenerator, LlmConfig, Result, SUPPORTED_PROVIDERS};
use tracing::debug;

use crate::anthropic::AnthropicClient;
use crate::gemini::GeminiClient;
use crate::ollama::OllamaClient;
use crate::openai::{OpenAiCompatibleClient, OPENAI_BASE_URL, ZHIPU_BASE_URL};

/// Build the generator named by `config.provider` (case-insensitive).
///
/// Unknown providers and missing credentials are configuration errors.
pub fn create_generator(config: &LlmConfig) -> Result<Arc<dyn CodeGenerator>> {
    let provider = config.provider_name();
    let timeout = config.request_timeout();
    let model = config.model.trim();
    if model.is_empty() {
        return Err(AutoleetError::Configuration(
            "llm.model must not be empty".to_string(),
        ));
    }
    let base_url = config
        .base_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty());
    debug!(provider = %provider, model, base_url = ?base_url, "building generator");

    let generator: Arc<dyn CodeGenerator> = match provider.as_str() {
        "openai" | "zhipu" => {
            let default_base = if provider == "openai" {
                OPENAI_BASE_URL
            } else {
                ZHIPU_BASE_URL
            };
            let client = OpenAiCompatibleClient::new(
                provider.as_str(),
                required_key(config, &provider)?,
                base_url.unwrap_or(default_base),
                model,
                timeout,
            )
            .map_err(setup_error)?;
            Arc::new(client)
        }
        "anthropic" => {
            let mut client = AnthropicClient::new(required_key(config, &provider)?, model, timeout)
                .map_err(setup_error)?;
            if let Some(url) = base_url {
                client = client.with_base_url(url);
            }
            Arc::new(client)
        }
        "gemini" => {
            let mut client = GeminiClient::new(required_key(config, &provider)?, model, timeout)
                .map_err(setup_error)?;
            if let Some(url) = base_url {
                client = client.with_base_url(url);
            }
            Arc::new(client)
        }
        "ollama" => {
            let mut client = OllamaClient::new(model, timeout).map_err(setup_error)?;
            if let Some(url) = base_url {
                client = client.with_base_url(url);
            }
            Arc::new(client)
        }
        other => {
            return Err(AutoleetError::Configuration(format!(
                "unsupported provider `{other}`; expected one of: {}",
                SUPPORTED_PROVIDERS.join(", ")
            )))
        }
    };
    Ok(generator)
}

fn required_key(config: &LlmConfig, provider: &str) -> Result<String> {
    config
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            AutoleetError::Configuration(format!("llm.api_key is required for provider `{provider}`"))
        })
}

fn setup_error(err: autoleet_core::ProviderError) -> AutoleetError {
    AutoleetError::Configuration(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str, key: Option<&str>) -> LlmConfig {
        LlmConfig {
            provider: provider.to_string(),
            api_key: key.map(str::to_string),
            model: "some-model".to_string(),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn every_supported_provider_builds() {
        for name in SUPPORTED_PROVIDERS {
            let generator = create_generator(&config(name, Some("key-123456789"))).unwrap();
            assert_eq!(generator.provider(), *name);
            assert_eq!(generator.model(), "some-model");
        }
    }

    #[test]
    fn provider_name_is_case_insensitive() {
        let generator = create_generator(&config(" Gemini ", Some("key"))).unwrap();
        assert_eq!(generator.provider(), "gemini");
    }

    #[test]
    fn unknown_provider_lists_supported() {
        let err = create_generator(&config("bard", Some("key"))).err().unwrap();
        assert!(err.is_fatal());
        let message = err.to_string();
        assert!(message.contains("bard"));
        for name in SUPPORTED_PROVIDERS {
            assert!(message.contains(name), "{message}");
        }
    }

    #[test]
    fn keyed_providers_need_a_key() {
        let err = create_generator(&config("openai", None)).err().unwrap();
        assert!(matches!(err, AutoleetError::Configuration(_)));
        assert!(create_generator(&config("anthropic", Some("  "))).is_err());
        assert!(create_generator(&config("ollama", None)).is_ok());
    }

    #[test]
    fn empty_model_is_rejected() {
        let mut cfg = config("ollama", None);
        cfg.model = " ".into();
        assert!(create_generator(&cfg).is_err());
    }
}

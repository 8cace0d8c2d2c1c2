//! AutoLeet model back-ends
//!
//! HTTP adapters implementing [`autoleet_core::CodeGenerator`] for hosted and
//! local vision models. Pick one from configuration with [`create_generator`].

mod http;

pub mod anthropic;
pub mod factory;
pub mod gemini;
pub mod ollama;
pub mod openai;

pub use anthropic::{AnthropicClient, ANTHROPIC_BASE_URL, ANTHROPIC_VERSION};
pub use factory::create_generator;
pub use gemini::{GeminiClient, GEMINI_BASE_URL};
pub use ollama::{OllamaClient, OLLAMA_BASE_URL};
pub use openai::{OpenAiCompatibleClient, OPENAI_BASE_URL, ZHIPU_BASE_URL};

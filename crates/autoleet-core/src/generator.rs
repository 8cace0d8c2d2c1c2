//! Code generation capability.
//!
//! The pipeline only sees [`CodeGenerator`]; concrete back-ends live in the
//! `autoleet-providers` crate and are chosen from configuration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Prompt used when the configuration does not supply one.
///
/// The title label on the first line is what [`crate::extract`] looks for.
pub const DEFAULT_PROMPT: &str = "\
You are given a screenshot of a programming problem.
Read the problem carefully and solve it in Python 3.

Reply in exactly this format:
Title: <the problem name>

```python
<a complete, runnable solution>
```

Requirements:
- Use only the Python standard library.
- Do not read from files, the network or stdin.
- Include a `__main__` block that runs the solution on the examples from the \
problem and prints the results, so that running the file exits with status 0 \
only when the examples pass.";

/// What the generator is asked to solve.
#[derive(Clone, PartialEq, Eq)]
pub enum GenerationInput {
    Image { bytes: Vec<u8>, media_type: String },
    Text(String),
}

impl std::fmt::Debug for GenerationInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationInput::Image { bytes, media_type } => f
                .debug_struct("Image")
                .field("media_type", media_type)
                .field("len", &bytes.len())
                .finish(),
            GenerationInput::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
        }
    }
}

/// Outcome of a provider connectivity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionReport {
    pub provider: String,
    pub model: String,
    pub success: bool,
    pub message: String,
    pub latency_ms: u64,
}

/// A model back-end that can write and fix solution scripts.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Provider name, e.g. `gemini`.
    fn provider(&self) -> &str;

    fn model(&self) -> &str;

    /// Produce a response containing a titled code block.
    ///
    /// For [`GenerationInput::Text`] the problem statement is already part of
    /// `prompt` (see [`text_prompt`]); only images travel separately.
    async fn generate(
        &self,
        input: &GenerationInput,
        prompt: &str,
    ) -> Result<String, ProviderError>;

    /// Produce a corrected version of `script` given the failure `diagnostic`.
    async fn repair(&self, script: &str, diagnostic: &str) -> Result<String, ProviderError>;

    /// Round-trip a trivial request to confirm credentials and reachability.
    async fn check_connection(&self) -> ConnectionReport;
}

/// Prompt for a repair request.
pub fn repair_prompt(script: &str, diagnostic: &str) -> String {
    format!(
        "The following Python solution fails when run.\n\n\
         Code:\n```python\n{}\n```\n\n\
         Error output:\n```\n{}\n```\n\n\
         Fix the code. Return only the complete corrected Python code in a \
         single ```python block, with no explanation.",
        script.trim_end(),
        diagnostic.trim_end()
    )
}

/// Prompt for [`CodeGenerator::generate`] when the input is text, not an image.
pub fn text_prompt(prompt: &str, problem: &str) -> String {
    format!("{prompt}\n\nThe problem statement follows instead of a screenshot:\n\n{problem}")
}

/// Prompt used by connection checks.
pub const PING_PROMPT: &str = "Reply with the single word OK.";

//! OpenAI-compatible chat completions, also spoken by Zhipu.

use std::time::Duration;

use async_trait::async_trait;
use autoleet_core::{
    repair_prompt, CodeGenerator, ConnectionReport, GenerationInput, ProviderError, PING_PROMPT,
};
use serde::{Deserialize, Serialize};

use crate::http::{self, EncodedImage, TEMPERATURE};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const ZHIPU_BASE_URL: &str = "https://open.bigmodel.cn/api/paas/v4";

#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    provider: String,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: Option<u32>,
    http_client: reqwest::Client,
}

impl OpenAiCompatibleClient {
    pub fn new(
        provider: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let provider = provider.into();
        let http_client = http::build_client(&provider, timeout)?;
        Ok(Self {
            provider,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            max_tokens: Some(4096),
            http_client,
        })
    }

    pub fn openai(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Self::new("openai", api_key, OPENAI_BASE_URL, model, timeout)
    }

    pub fn zhipu(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Self::new("zhipu", api_key, ZHIPU_BASE_URL, model, timeout)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn request_body<'a>(
        &'a self,
        prompt: &'a str,
        image: Option<&EncodedImage>,
    ) -> ChatCompletionRequest<'a> {
        let content = match image {
            Some(image) => MessageContent::Parts(vec![
                ContentPart::Text { text: prompt },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image.data_url(),
                    },
                },
            ]),
            None => MessageContent::Text(prompt),
        };
        ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content,
            }],
            max_tokens: self.max_tokens,
            temperature: TEMPERATURE,
        }
    }

    async fn complete(
        &self,
        prompt: &str,
        image: Option<&EncodedImage>,
    ) -> Result<String, ProviderError> {
        let request = self
            .http_client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&self.request_body(prompt, image));
        let completion: ChatCompletionResponse = http::send_json(&self.provider, request).await?;
        completion_text(&self.provider, completion)
    }
}

fn completion_text(
    provider: &str,
    completion: ChatCompletionResponse,
) -> Result<String, ProviderError> {
    let text = completion
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content);
    http::non_empty(provider, text)
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: MessageContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl CodeGenerator for OpenAiCompatibleClient {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        input: &GenerationInput,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        let image = http::encoded_image(input);
        self.complete(prompt, image.as_ref()).await
    }

    async fn repair(&self, script: &str, diagnostic: &str) -> Result<String, ProviderError> {
        self.complete(&repair_prompt(script, diagnostic), None).await
    }

    async fn check_connection(&self) -> ConnectionReport {
        http::probe(&self.provider, &self.model, self.complete(PING_PROMPT, None)).await
    }
}

//! Anthropic Messages API.

use std::time::Duration;

use async_trait::async_trait;
use autoleet_core::{
    repair_prompt, CodeGenerator, ConnectionReport, GenerationInput, ProviderError, PING_PROMPT,
};
use serde::{Deserialize, Serialize};

use crate::http::{self, EncodedImage, TEMPERATURE};

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    api_key: String,
    base_url: String,
    model: String,
    http_client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            api_key: api_key.into(),
            base_url: ANTHROPIC_BASE_URL.to_string(),
            model: model.into(),
            http_client: http::build_client("anthropic", timeout)?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    fn request_body<'a>(
        &'a self,
        prompt: &'a str,
        image: Option<&'a EncodedImage>,
    ) -> MessagesRequest<'a> {
        let mut content = Vec::with_capacity(2);
        if let Some(image) = image {
            content.push(ContentBlock::Image {
                source: ImageSource {
                    kind: "base64",
                    media_type: &image.media_type,
                    data: &image.data,
                },
            });
        }
        content.push(ContentBlock::Text { text: prompt });

        MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
            messages: vec![Message {
                role: "user",
                content,
            }],
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
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.request_body(prompt, image));
        let response: MessagesResponse = http::send_json("anthropic", request).await?;
        response_text(response)
    }
}

/// Concatenate the text blocks of a reply.
fn response_text(response: MessagesResponse) -> Result<String, ProviderError> {
    let text: String = response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("\n");
    http::non_empty("anthropic", Some(text))
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock<'a> {
    Image { source: ImageSource<'a> },
    Text { text: &'a str },
}

#[derive(Debug, Serialize)]
struct ImageSource<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl CodeGenerator for AnthropicClient {
    fn provider(&self) -> &str {
        "anthropic"
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
        http::probe("anthropic", &self.model, self.complete(PING_PROMPT, None)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> AnthropicClient {
        AnthropicClient::new("sk-ant-test", "claude-sonnet-4-5", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn image_block_precedes_prompt() {
        let client = client();
        let image = EncodedImage {
            media_type: "image/png".into(),
            data: "iVBOR".into(),
        };
        let body = serde_json::to_value(client.request_body("solve it", Some(&image))).unwrap();
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(
            body["messages"][0]["content"],
            json!([
                {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "iVBOR"}},
                {"type": "text", "text": "solve it"}
            ])
        );
        assert_eq!(client.endpoint(), "https://api.anthropic.com/v1/messages");
    }

    #[test]
    fn joins_text_blocks_and_skips_others() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "content": [
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "Title: Two Sum"},
                {"type": "text", "text": "```python\npass\n```"}
            ],
            "stop_reason": "end_turn"
        }))
        .unwrap();
        assert_eq!(
            response_text(response).unwrap(),
            "Title: Two Sum\n```python\npass\n```"
        );
    }

    #[test]
    fn no_text_blocks_is_empty_response() {
        let response: MessagesResponse =
            serde_json::from_value(json!({"content": []})).unwrap();
        assert!(matches!(
            response_text(response),
            Err(ProviderError::EmptyResponse { .. })
        ));
    }
}

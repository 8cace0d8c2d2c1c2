//! Local Ollama server. No credentials.

use std::time::Duration;

use async_trait::async_trait;
use autoleet_core::{
    repair_prompt, CodeGenerator, ConnectionReport, GenerationInput, ProviderError, PING_PROMPT,
};
use serde::{Deserialize, Serialize};

use crate::http::{self, EncodedImage, TEMPERATURE};

pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    http_client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(model: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            base_url: OLLAMA_BASE_URL.to_string(),
            model: model.into(),
            http_client: http::build_client("ollama", timeout)?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    fn request_body<'a>(
        &'a self,
        prompt: &'a str,
        image: Option<&'a EncodedImage>,
    ) -> GenerateRequest<'a> {
        GenerateRequest {
            model: &self.model,
            prompt,
            images: image.map(|image| image.data.as_str()).into_iter().collect(),
            stream: false,
            options: GenerateOptions {
                temperature: TEMPERATURE,
            },
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
            .json(&self.request_body(prompt, image));
        let response: GenerateResponse = http::send_json("ollama", request).await?;
        http::non_empty("ollama", response.response)
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<&'a str>,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
}

#[async_trait]
impl CodeGenerator for OllamaClient {
    fn provider(&self) -> &str {
        "ollama"
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
        http::probe("ollama", &self.model, self.complete(PING_PROMPT, None)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> OllamaClient {
        OllamaClient::new("llava", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn image_goes_in_images_array() {
        let client = client();
        let image = EncodedImage {
            media_type: "image/png".into(),
            data: "QUJD".into(),
        };
        let body = serde_json::to_value(client.request_body("solve", Some(&image))).unwrap();
        assert_eq!(body["images"], json!(["QUJD"]));
        assert_eq!(body["stream"], false);
        assert_eq!(body["prompt"], "solve");
    }

    #[test]
    fn text_request_omits_images() {
        let body = serde_json::to_value(client().request_body("fix", None)).unwrap();
        assert!(body.get("images").is_none());
        assert_eq!(client().endpoint(), "http://localhost:11434/api/generate");
    }

    #[test]
    fn response_field_is_the_completion() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "model": "llava",
            "response": "Title: X",
            "done": true
        }))
        .unwrap();
        assert_eq!(response.response.as_deref(), Some("Title: X"));
    }
}

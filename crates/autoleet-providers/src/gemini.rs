//! Google Gemini `generateContent`.

use std::time::Duration;

use async_trait::async_trait;
use autoleet_core::{
    repair_prompt, CodeGenerator, ConnectionReport, GenerationInput, ProviderError, PING_PROMPT,
};
use serde::{Deserialize, Serialize};

use crate::http::{self, EncodedImage, TEMPERATURE};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: String,
    base_url: String,
    model: String,
    http_client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            api_key: api_key.into(),
            base_url: GEMINI_BASE_URL.to_string(),
            model: model.into(),
            http_client: http::build_client("gemini", timeout)?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Endpoint without the key, which is passed as a query parameter.
    pub fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    fn request_body<'a>(
        &self,
        prompt: &'a str,
        image: Option<&'a EncodedImage>,
    ) -> GenerateContentRequest<'a> {
        let mut parts = Vec::with_capacity(2);
        if let Some(image) = image {
            parts.push(Part::InlineData {
                inline_data: InlineData {
                    mime_type: &image.media_type,
                    data: &image.data,
                },
            });
        }
        parts.push(Part::Text { text: prompt });

        GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts,
            }],
            generation_config: GenerationConfig {
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
            .query(&[("key", self.api_key.as_str())])
            .json(&self.request_body(prompt, image));
        let response: GenerateContentResponse = http::send_json("gemini", request).await?;
        response_text(response)
    }
}

fn response_text(response: GenerateContentResponse) -> Result<String, ProviderError> {
    let text = response.candidates.into_iter().next().map(|candidate| {
        candidate
            .content
            .parts
            .into_iter()
            .filter_map(|part| part.text)
            .collect::<String>()
    });
    http::non_empty("gemini", text)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
    Text { text: &'a str },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl CodeGenerator for GeminiClient {
    fn provider(&self) -> &str {
        "gemini"
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
        http::probe("gemini", &self.model, self.complete(PING_PROMPT, None)).await
    }
}

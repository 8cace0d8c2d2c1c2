//! Plumbing shared by every HTTP back-end.

use std::future::Future;
use std::time::{Duration, Instant};

use autoleet_core::{ConnectionReport, GenerationInput, ProviderError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use tracing::debug;

pub(crate) const USER_AGENT: &str = concat!("autoleet/", env!("CARGO_PKG_VERSION"));

/// Error bodies are cut to this many bytes before they reach logs.
pub(crate) const MAX_ERROR_BODY: usize = 2048;

/// Sampling temperature for every request. Low, since we want code.
pub(crate) const TEMPERATURE: f64 = 0.2;

pub(crate) fn build_client(
    provider: &str,
    timeout: Duration,
) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| transport_error(provider, e))
}

/// Transport failure, with the URL stripped so query-string keys never leak.
pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> ProviderError {
    ProviderError::Http {
        provider: provider.to_string(),
        message: err.without_url().to_string(),
    }
}

/// Send `request` and decode a 2xx JSON body into `R`.
pub(crate) async fn send_json<R>(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<R, ProviderError>
where
    R: DeserializeOwned,
{
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(provider, e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Api {
            provider: provider.to_string(),
            status: status.as_u16(),
            body: truncate_body(&body),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| transport_error(provider, e))?;
    debug!(provider, bytes = bytes.len(), "response received");
    decode(provider, &bytes)
}

pub(crate) fn decode<R>(provider: &str, bytes: &[u8]) -> Result<R, ProviderError>
where
    R: DeserializeOwned,
{
    serde_json::from_slice(bytes).map_err(|e| ProviderError::Decode {
        provider: provider.to_string(),
        message: e.to_string(),
    })
}

pub(crate) fn truncate_body(body: &str) -> String {
    let body = body.trim();
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// Reject blank completions.
pub(crate) fn non_empty(provider: &str, text: Option<String>) -> Result<String, ProviderError> {
    match text {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(ProviderError::EmptyResponse {
            provider: provider.to_string(),
        }),
    }
}

/// An image attachment ready for a JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EncodedImage {
    pub media_type: String,
    pub data: String,
}

impl EncodedImage {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }
}

/// Base64 form of the image in `input`. Text inputs travel inside the prompt.
pub(crate) fn encoded_image(input: &GenerationInput) -> Option<EncodedImage> {
    match input {
        GenerationInput::Image { bytes, media_type } => Some(EncodedImage {
            media_type: media_type.clone(),
            data: STANDARD.encode(bytes),
        }),
        GenerationInput::Text(_) => None,
    }
}

/// Time `request` and fold the outcome into a [`ConnectionReport`].
pub(crate) async fn probe<F>(provider: &str, model: &str, request: F) -> ConnectionReport
where
    F: Future<Output = Result<String, ProviderError>>,
{
    let started = Instant::now();
    let result = request.await;
    let latency_ms = started.elapsed().as_millis() as u64;

    let (success, message) = match result {
        Ok(reply) => {
            let first = reply.lines().next().unwrap_or_default().trim();
            let preview: String = first.chars().take(60).collect();
            (true, format!("connected, model replied: {preview}"))
        }
        Err(e) => (false, e.to_string()),
    };
    ConnectionReport {
        provider: provider.to_string(),
        model: model.to_string(),
        success,
        message,
        latency_ms,
    }
}

//! OpenAI Provider
//!
//! Talks to the Chat Completions API (or any OpenAI-compatible endpoint).
//! Streaming responses are decoded with the shared SSE parser; images travel
//! as data-URL `image_url` parts and other files as `file` parts.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::StreamExt;
use serde_json::{Value, json};
use tracing::debug;

use crate::net::{HttpClient, SseStream};
use crate::providers::types::{
    Generation, ProviderKind, ReasoningDetail, UpstreamMessage, UpstreamPart, UpstreamRequest,
};
use crate::providers::{OpenAiCredentials, ProviderFuture, TextStream, UpstreamError, UpstreamProvider};

/// Public API base used when nothing else is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

// ---------------------------------------------------------------------------
// Response types for deserialization
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Deserialize)]
struct OaiResponse {
    #[serde(default)]
    choices: Vec<OaiChoice>,
}

#[derive(Debug, serde::Deserialize)]
struct OaiChoice {
    #[serde(default)]
    message: Option<OaiMessage>,
}

#[derive(Debug, serde::Deserialize)]
struct OaiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct OaiStreamChunk {
    #[serde(default)]
    choices: Vec<OaiStreamChoice>,
}

#[derive(Debug, serde::Deserialize)]
struct OaiStreamChoice {
    #[serde(default)]
    delta: Option<OaiDelta>,
}

#[derive(Debug, serde::Deserialize)]
struct OaiDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct OaiErrorBody {
    error: OaiErrorDetail,
}

#[derive(Debug, serde::Deserialize)]
struct OaiErrorDetail {
    #[serde(default)]
    message: String,
}

// ---------------------------------------------------------------------------
// OpenAiProvider
// ---------------------------------------------------------------------------

pub struct OpenAiProvider {
    client: HttpClient,
    credentials: OpenAiCredentials,
    endpoint: String,
}

impl OpenAiProvider {
    pub fn new(client: HttpClient, credentials: OpenAiCredentials) -> Result<Self, UpstreamError> {
        let base = url::Url::parse(&credentials.base_url)
            .map_err(|e| UpstreamError::Validation(format!("Invalid OpenAI base URL: {e}")))?;
        let endpoint = format!("{}/chat/completions", base.as_str().trim_end_matches('/'));
        Ok(Self {
            client,
            credentials,
            endpoint,
        })
    }

    /// Build the Chat Completions request body.
    fn build_request_body(request: &UpstreamRequest, stream: bool) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(json!({ "role": "system", "content": request.system }));
        }
        messages.extend(request.messages.iter().map(convert_message));

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "stream": stream,
        });

        if request.reasoning.is_some() {
            // Reasoning models reject a custom temperature.
            body["reasoning_effort"] = json!("medium");
        } else {
            body["temperature"] = json!(request.temperature);
        }

        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, UpstreamError> {
        let resp = self
            .client
            .inner()
            .post(&self.endpoint)
            .bearer_auth(&self.credentials.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| UpstreamError::unknown(format!("OpenAI request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(error_from_body(status.as_u16(), &text));
        }
        Ok(resp)
    }
}

fn convert_message(message: &UpstreamMessage) -> Value {
    if message.is_text_only() {
        return json!({
            "role": message.role.as_str(),
            "content": message.joined_text(),
        });
    }

    let parts: Vec<Value> = message
        .parts
        .iter()
        .map(|part| match part {
            UpstreamPart::Text(text) => json!({ "type": "text", "text": text }),
            UpstreamPart::Image { data, media_type } => json!({
                "type": "image_url",
                "image_url": { "url": data_url(media_type, data) },
            }),
            UpstreamPart::File {
                data,
                media_type,
                name,
            } => json!({
                "type": "file",
                "file": {
                    "filename": name.clone().unwrap_or_else(|| "attachment".to_string()),
                    "file_data": data_url(media_type, data),
                },
            }),
        })
        .collect();

    json!({ "role": message.role.as_str(), "content": parts })
}

fn data_url(media_type: &str, data: &[u8]) -> String {
    format!("data:{media_type};base64,{}", BASE64.encode(data))
}

/// Decode an error response into the closed taxonomy, preferring the
/// `{"error":{"message":...}}` message when present.
fn error_from_body(status: u16, body: &str) -> UpstreamError {
    let message = serde_json::from_str::<OaiErrorBody>(body)
        .map(|b| b.error.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.to_string());
    UpstreamError::from_status(status, message)
}

/// Extract the text delta from one streamed `data:` payload.
fn parse_stream_payload(data: &str) -> Option<String> {
    match serde_json::from_str::<OaiStreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .find_map(|c| c.delta.and_then(|d| d.content))
            .filter(|t| !t.is_empty()),
        Err(e) => {
            debug!(data = data, error = %e, "Skipping unparseable OpenAI SSE payload");
            None
        }
    }
}

impl UpstreamProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn stream(&self, request: &UpstreamRequest) -> ProviderFuture<'_, TextStream> {
        let body = Self::build_request_body(request, true);
        Box::pin(async move {
            let resp = self.send(&body).await?;

            let stream = SseStream::new(resp.bytes_stream()).filter_map(|event| {
                let item = match event {
                    Ok(event) if event.is_done() || !event.is_message() => None,
                    Ok(event) => parse_stream_payload(&event.data).map(Ok),
                    Err(e) => Some(Err(UpstreamError::unknown(format!(
                        "OpenAI stream error: {e}"
                    )))),
                };
                futures::future::ready(item)
            });

            Ok(Box::pin(stream) as TextStream)
        })
    }

    fn generate(&self, request: &UpstreamRequest) -> ProviderFuture<'_, Generation> {
        let body = Self::build_request_body(request, false);
        Box::pin(async move {
            let resp = self.send(&body).await?;
            let oai: OaiResponse = resp.json().await.map_err(|e| {
                UpstreamError::unknown(format!("Failed to parse OpenAI response: {e}"))
            })?;

            let message = oai.choices.into_iter().find_map(|c| c.message);
            let (text, reasoning) = match message {
                Some(m) => (m.content.unwrap_or_default(), m.reasoning_content),
                None => (String::new(), None),
            };
            let reasoning_details = reasoning.as_ref().map(|r| {
                vec![ReasoningDetail::Text {
                    text: r.clone(),
                    signature: None,
                }]
            });

            Ok(Generation {
                text,
                reasoning,
                reasoning_details,
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

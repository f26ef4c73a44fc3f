//! Amazon Bedrock Provider
//!
//! Sends Anthropic Messages bodies through `InvokeModel` and
//! `InvokeModelWithResponseStream`. The SDK's event receiver is pulled lazily,
//! so dropping the returned stream abandons the upstream call.

use aws_config::{BehaviorVersion, Region};
use aws_sdk_bedrockruntime::Client;
use aws_sdk_bedrockruntime::config::Credentials;
use aws_sdk_bedrockruntime::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_bedrockruntime::types::ResponseStream;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::providers::types::{
    Generation, ProviderKind, ReasoningDetail, UpstreamMessage, UpstreamPart, UpstreamRequest,
};
use crate::providers::{BedrockCredentials, ProviderFuture, TextStream, UpstreamError, UpstreamProvider};

const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

pub struct BedrockProvider {
    client: Client,
    region: String,
}

impl BedrockProvider {
    /// Build an SDK client from explicit credentials. Nothing is read from or
    /// written to the process environment for the keys themselves.
    pub async fn connect(credentials: &BedrockCredentials) -> Self {
        let keys = Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            None,
            None,
            "agentrelay",
        );
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(credentials.region.clone()))
            .credentials_provider(keys)
            .load()
            .await;

        Self {
            client: Client::new(&sdk_config),
            region: credentials.region.clone(),
        }
    }
}

/// Build the Anthropic Messages request body.
pub fn build_request_body(request: &UpstreamRequest) -> Value {
    let messages: Vec<Value> = request.messages.iter().map(convert_message).collect();

    let mut body = json!({
        "anthropic_version": ANTHROPIC_VERSION,
        "max_tokens": request.max_tokens,
        "messages": messages,
    });
    if !request.system.is_empty() {
        body["system"] = json!(request.system);
    }

    match request.reasoning {
        Some(reasoning) => {
            // Extended thinking rejects a custom temperature and needs room
            // for the answer beyond the thinking budget.
            body["thinking"] = json!({
                "type": "enabled",
                "budget_tokens": reasoning.budget_tokens,
            });
            if request.max_tokens <= reasoning.budget_tokens {
                body["max_tokens"] = json!(reasoning.budget_tokens + request.max_tokens);
            }
        }
        None => {
            body["temperature"] = json!(request.temperature);
        }
    }

    body
}

fn convert_message(message: &UpstreamMessage) -> Value {
    let content: Vec<Value> = message
        .parts
        .iter()
        .map(|part| match part {
            UpstreamPart::Text(text) => json!({ "type": "text", "text": text }),
            UpstreamPart::Image { data, media_type } => json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": media_type,
                    "data": BASE64.encode(data),
                },
            }),
            UpstreamPart::File {
                data,
                media_type,
                name,
            } if media_type.starts_with("text/") => {
                let body = String::from_utf8_lossy(data);
                let text = match name {
                    Some(name) => format!("[{name}]\n{body}"),
                    None => body.into_owned(),
                };
                json!({ "type": "text", "text": text })
            }
            UpstreamPart::File {
                data, media_type, ..
            } => json!({
                "type": "document",
                "source": {
                    "type": "base64",
                    "media_type": media_type,
                    "data": BASE64.encode(data),
                },
            }),
        })
        .collect();

    json!({ "role": message.role.as_str(), "content": content })
}

/// Map a Bedrock service error code onto the upstream taxonomy.
pub fn classify_bedrock_error(code: Option<&str>, message: impl Into<String>) -> UpstreamError {
    let message = message.into();
    let Some(code) = code else {
        return UpstreamError::unknown(message);
    };
    let name = code.trim_end_matches("Exception");
    match name {
        "AccessDenied" | "UnrecognizedClient" | "ExpiredToken" | "InvalidSignature" => {
            UpstreamError::PermissionDenied(message)
        }
        "Validation" | "ResourceNotFound" => UpstreamError::Validation(message),
        "Throttling" | "ServiceQuotaExceeded" | "ModelNotReady" | "ServiceUnavailable"
        | "ModelTimeout" => UpstreamError::Unavailable(message),
        _ => UpstreamError::unknown(format!("{code}: {message}")),
    }
}

fn sdk_error<E, R>(err: SdkError<E, R>) -> UpstreamError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let service = err.as_service_error();
    let code = service.and_then(|e| e.code()).map(str::to_string);
    let message = service
        .and_then(|e| e.message())
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
    classify_bedrock_error(code.as_deref(), message)
}

/// Extract the text delta from one streamed Anthropic event.
///
/// Returns `Ok(None)` for events that carry no visible text (message start,
/// thinking deltas, stop markers).
fn parse_stream_event(bytes: &[u8]) -> Result<Option<String>, UpstreamError> {
    let event: Value = serde_json::from_slice(bytes)
        .map_err(|e| UpstreamError::unknown(format!("Malformed Bedrock stream event: {e}")))?;

    match event["type"].as_str() {
        Some("content_block_delta") if event["delta"]["type"] == "text_delta" => Ok(event["delta"]
            ["text"]
            .as_str()
            .filter(|t| !t.is_empty())
            .map(str::to_string)),
        Some("error") => {
            let message = event["error"]["message"]
                .as_str()
                .unwrap_or("Bedrock stream error")
                .to_string();
            Err(match event["error"]["type"].as_str() {
                Some("overloaded_error") | Some("rate_limit_error") => {
                    UpstreamError::Unavailable(message)
                }
                _ => UpstreamError::unknown(message),
            })
        }
        _ => Ok(None),
    }
}

/// Turn a non-streaming Anthropic response into a [`Generation`].
fn parse_generation(body: &[u8]) -> Result<Generation, UpstreamError> {
    let response: Value = serde_json::from_slice(body)
        .map_err(|e| UpstreamError::unknown(format!("Failed to parse Bedrock response: {e}")))?;

    let mut text = String::new();
    let mut reasoning = String::new();
    let mut details = Vec::new();

    for block in response["content"].as_array().into_iter().flatten() {
        match block["type"].as_str() {
            Some("text") => text.push_str(block["text"].as_str().unwrap_or_default()),
            Some("thinking") => {
                let thought = block["thinking"].as_str().unwrap_or_default();
                reasoning.push_str(thought);
                details.push(ReasoningDetail::Text {
                    text: thought.to_string(),
                    signature: block["signature"].as_str().map(str::to_string),
                });
            }
            Some("redacted_thinking") => details.push(ReasoningDetail::Redacted {
                data: block["data"].as_str().unwrap_or_default().to_string(),
            }),
            other => debug!(block_type = ?other, "Ignoring Bedrock content block"),
        }
    }

    Ok(Generation {
        text,
        reasoning: (!reasoning.is_empty()).then_some(reasoning),
        reasoning_details: (!details.is_empty()).then_some(details),
    })
}

fn encode_body(request: &UpstreamRequest) -> Result<Blob, UpstreamError> {
    let body = serde_json::to_vec(&build_request_body(request))
        .map_err(|e| UpstreamError::unknown(format!("Failed to encode Bedrock request: {e}")))?;
    Ok(Blob::new(body))
}

impl UpstreamProvider for BedrockProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Bedrock
    }

    fn stream(&self, request: &UpstreamRequest) -> ProviderFuture<'_, TextStream> {
        let model = request.model.clone();
        let body = encode_body(request);
        Box::pin(async move {
            info!(model = %model, region = %self.region, "Invoking Bedrock model (streaming)");
            let response = self
                .client
                .invoke_model_with_response_stream()
                .model_id(&model)
                .content_type("application/json")
                .accept("application/json")
                .body(body?)
                .send()
                .await
                .map_err(sdk_error)?;

            let receiver = response.body;
            let stream = futures::stream::unfold(Some(receiver), |state| async move {
                let mut receiver = state?;
                loop {
                    match receiver.recv().await {
                        Ok(Some(ResponseStream::Chunk(part))) => {
                            let Some(bytes) = part.bytes else { continue };
                            match parse_stream_event(bytes.as_ref()) {
                                Ok(Some(text)) => return Some((Ok(text), Some(receiver))),
                                Ok(None) => continue,
                                Err(e) => return Some((Err(e), None)),
                            }
                        }
                        Ok(Some(_)) => continue,
                        Ok(None) => return None,
                        Err(e) => {
                            let err = sdk_error(e);
                            warn!(error = %err, "Bedrock stream failed");
                            return Some((Err(err), None));
                        }
                    }
                }
            });

            Ok(Box::pin(stream) as TextStream)
        })
    }

    fn generate(&self, request: &UpstreamRequest) -> ProviderFuture<'_, Generation> {
        let model = request.model.clone();
        let body = encode_body(request);
        Box::pin(async move {
            info!(model = %model, region = %self.region, "Invoking Bedrock model");
            let response = self
                .client
                .invoke_model()
                .model_id(&model)
                .content_type("application/json")
                .accept("application/json")
                .body(body?)
                .send()
                .await
                .map_err(sdk_error)?;

            parse_generation(response.body.as_ref())
        })
    }
}

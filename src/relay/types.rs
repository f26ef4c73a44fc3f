//! Wire types accepted by the relay routes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::providers::types::ProviderKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One typed part of multi-part message content. Binary payloads are base64.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(default, rename = "mediaType", skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    File {
        data: String,
        #[serde(default, rename = "mediaType", skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

/// Message content: a plain string or an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl MessageContent {
    /// Plain text of the content, joining text parts with newlines.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn is_plain_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    fn has_binary_parts(&self) -> bool {
        match self {
            Self::Text(_) => false,
            Self::Parts(parts) => parts.iter().any(|p| !matches!(p, ContentPart::Text { .. })),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    /// Base64 payload; a `data:` URL prefix is tolerated.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConversationMessage {
    pub role: Role,
    #[serde(default)]
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl ConversationMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
            attachments: Vec::new(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
            attachments: Vec::new(),
        }
    }

    /// True when the message carries files or images, either as attachments
    /// or as binary content parts.
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty() || self.content.has_binary_parts()
    }
}

/// Body of `POST /api/chat`.
#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    #[serde(default, alias = "conversation")]
    pub messages: Vec<ConversationMessage>,
    #[serde(default, alias = "providerSelection", skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    #[serde(
        default,
        alias = "modelIdentifier",
        alias = "bedrockModel",
        skip_serializing_if = "Option::is_none"
    )]
    pub model: Option<String>,
    #[serde(default, alias = "reasoningRequested")]
    pub enable_reasoning: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_access_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_secret_access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_region: Option<String>,
}

impl fmt::Debug for ChatPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatPayload")
            .field("messages", &self.messages.len())
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("enable_reasoning", &self.enable_reasoning)
            .field("credentials", &self.credentials())
            .finish()
    }
}

impl ChatPayload {
    pub fn credentials(&self) -> RequestCredentials {
        RequestCredentials {
            api_key: self.api_key.clone(),
            aws_access_key_id: self.aws_access_key_id.clone(),
            aws_secret_access_key: self.aws_secret_access_key.clone(),
            aws_region: self.aws_region.clone(),
        }
    }

    pub fn into_request(self, default_provider: ProviderKind) -> RelayRequest {
        let credentials = self.credentials();
        RelayRequest {
            conversation: self.messages,
            provider: self.provider.unwrap_or(default_provider),
            model: self.model.filter(|m| !m.trim().is_empty()),
            reasoning_requested: self.enable_reasoning,
            credentials,
            system_prompt: None,
        }
    }
}

/// Body of `POST /api/agents/chat`. Credentials come from configuration only.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentChatPayload {
    pub agent_id: String,
    pub messages: Vec<ConversationMessage>,
    #[serde(default)]
    pub enable_reasoning: bool,
}

/// Per-request credentials. Used for one call and never persisted or logged.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RequestCredentials {
    pub api_key: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_region: Option<String>,
}

impl fmt::Debug for RequestCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("RequestCredentials")
            .field("api_key", &mask(&self.api_key))
            .field("aws_access_key_id", &mask(&self.aws_access_key_id))
            .field("aws_secret_access_key", &mask(&self.aws_secret_access_key))
            .field("aws_region", &self.aws_region)
            .finish()
    }
}

/// One relay invocation, built per submission and dropped after the call.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub conversation: Vec<ConversationMessage>,
    pub provider: ProviderKind,
    /// Model identifier; the provider's configured default when `None`.
    pub model: Option<String>,
    pub reasoning_requested: bool,
    pub credentials: RequestCredentials,
    /// Replaces the configured system prompt when set.
    pub system_prompt: Option<String>,
}

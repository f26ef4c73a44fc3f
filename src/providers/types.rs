use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Upstream provider family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    #[default]
    #[serde(rename = "bedrock")]
    Bedrock,
}

impl ProviderKind {
    /// Name shown to users in simulated replies and error messages.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::Bedrock => "Amazon Bedrock",
        }
    }

    /// What the user needs to configure to reach this provider.
    pub fn credential_label(self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI API key",
            Self::Bedrock => "AWS credentials",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Bedrock => write!(f, "bedrock"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "bedrock" | "amazon-bedrock" | "aws" => Ok(Self::Bedrock),
            _ => Err(format!("Unknown provider: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamRole {
    User,
    Assistant,
}

impl UpstreamRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One normalized content part. Binary payloads are already decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamPart {
    Text(String),
    Image {
        data: Bytes,
        media_type: String,
    },
    File {
        data: Bytes,
        media_type: String,
        name: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamMessage {
    pub role: UpstreamRole,
    pub parts: Vec<UpstreamPart>,
}

impl UpstreamMessage {
    pub fn text(role: UpstreamRole, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![UpstreamPart::Text(text.into())],
        }
    }

    /// True when every part is text (lets adapters send plain strings).
    pub fn is_text_only(&self) -> bool {
        self.parts.iter().all(|p| matches!(p, UpstreamPart::Text(_)))
    }

    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                UpstreamPart::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReasoningConfig {
    pub budget_tokens: u32,
}

/// Provider-neutral request handed to an adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRequest {
    pub model: String,
    pub system: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub messages: Vec<UpstreamMessage>,
    pub reasoning: Option<ReasoningConfig>,
}

/// Result of a blocking (reasoning-mode) call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Generation {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_details: Option<Vec<ReasoningDetail>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReasoningDetail {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    Redacted {
        data: String,
    },
}

//! Upstream LLM providers.
//!
//! Defines the [`UpstreamProvider`] trait, the closed [`UpstreamError`]
//! taxonomy every adapter decodes its failures into, and the
//! [`ProviderFactory`] that turns resolved credentials into a provider.
//! Concrete adapters live in `openai` and `bedrock`.

pub mod bedrock;
pub mod openai;
pub mod types;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;

use crate::config::ProvidersConfig;
use crate::net::HttpClient;
use crate::providers::bedrock::BedrockProvider;
use crate::providers::openai::OpenAiProvider;
use crate::providers::types::{Generation, ProviderKind, UpstreamRequest};

/// Stream of incremental text chunks from an upstream model.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, UpstreamError>> + Send>>;

/// Boxed future returned by provider methods (keeps the traits dyn-compatible).
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UpstreamError>> + Send + 'a>>;

// ---------------------------------------------------------------------------
// UpstreamError
// ---------------------------------------------------------------------------

/// Upstream failures, decoded once at the adapter boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Throughput limits or the model is not available right now.
    #[error("Model unavailable: {0}")]
    Unavailable(String),

    #[error("{message}")]
    Unknown { status: Option<u16>, message: String },
}

impl UpstreamError {
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            status: None,
            message: message.into(),
        }
    }

    /// Classify an HTTP error status returned by an upstream API.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::PermissionDenied(message),
            400 | 404 | 413 | 422 => Self::Validation(message),
            408 | 429 | 503 | 529 => Self::Unavailable(message),
            _ => Self::Unknown {
                status: Some(status),
                message,
            },
        }
    }

    /// Best-effort HTTP status for the error envelope.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::PermissionDenied(_) => 403,
            Self::Validation(_) => 400,
            Self::Unavailable(_) => 503,
            Self::Unknown { status, .. } => status
                .filter(|s| (400..=599).contains(s))
                .unwrap_or(502),
        }
    }

    /// Machine-readable code for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => "permission_denied",
            Self::Validation(_) => "validation_error",
            Self::Unavailable(_) => "model_unavailable",
            Self::Unknown { .. } => "upstream_error",
        }
    }

    /// Raw message without the class prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::PermissionDenied(m) | Self::Validation(m) | Self::Unavailable(m) => m,
            Self::Unknown { message, .. } => message,
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// OpenAI-compatible endpoint credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct OpenAiCredentials {
    pub api_key: String,
    pub base_url: String,
}

/// AWS credentials for Bedrock.
#[derive(Clone, PartialEq, Eq)]
pub struct BedrockCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
}

/// Credentials resolved for exactly one provider. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub enum ResolvedCredentials {
    OpenAi(OpenAiCredentials),
    Bedrock(BedrockCredentials),
}

impl ResolvedCredentials {
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::OpenAi(_) => ProviderKind::OpenAi,
            Self::Bedrock(_) => ProviderKind::Bedrock,
        }
    }
}

impl fmt::Debug for OpenAiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiCredentials")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl fmt::Debug for BedrockCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BedrockCredentials")
            .field("access_key_id", &"<redacted>")
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

impl fmt::Debug for ResolvedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi(c) => c.fmt(f),
            Self::Bedrock(c) => c.fmt(f),
        }
    }
}

// ---------------------------------------------------------------------------
// UpstreamProvider trait
// ---------------------------------------------------------------------------

/// A configured connection to one upstream model provider.
///
/// Async methods return boxed futures so the trait is dyn-compatible (can be
/// used as `Arc<dyn UpstreamProvider>`).
pub trait UpstreamProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Start a streaming completion. The returned stream pulls lazily from
    /// the upstream connection; dropping it abandons the call.
    fn stream(&self, request: &UpstreamRequest) -> ProviderFuture<'_, TextStream>;

    /// Single blocking completion, including any reasoning trace.
    fn generate(&self, request: &UpstreamRequest) -> ProviderFuture<'_, Generation>;
}

/// Builds providers from per-request credentials.
pub trait ProviderFactory: Send + Sync {
    fn build<'a>(
        &'a self,
        credentials: &'a ResolvedCredentials,
    ) -> ProviderFuture<'a, Arc<dyn UpstreamProvider>>;
}

/// Factory backed by the real SDK/HTTP adapters.
#[derive(Debug, Clone)]
pub struct SdkProviderFactory {
    http: HttpClient,
}

impl SdkProviderFactory {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    /// Streaming client bounded by the configured connect and idle-read timeouts.
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let openai = &config.openai;
        Self::new(
            HttpClient::builder()
                .streaming()
                .connect_timeout(Duration::from_secs(openai.connect_timeout_secs))
                .read_timeout(Duration::from_secs(openai.timeout_secs))
                .build(),
        )
    }
}

impl Default for SdkProviderFactory {
    fn default() -> Self {
        Self::new(HttpClient::builder().streaming().build())
    }
}

impl ProviderFactory for SdkProviderFactory {
    fn build<'a>(
        &'a self,
        credentials: &'a ResolvedCredentials,
    ) -> ProviderFuture<'a, Arc<dyn UpstreamProvider>> {
        Box::pin(async move {
            let provider: Arc<dyn UpstreamProvider> = match credentials {
                ResolvedCredentials::OpenAi(creds) => {
                    Arc::new(OpenAiProvider::new(self.http.clone(), creds.clone())?)
                }
                ResolvedCredentials::Bedrock(creds) => {
                    Arc::new(BedrockProvider::connect(creds).await)
                }
            };
            Ok(provider)
        })
    }
}

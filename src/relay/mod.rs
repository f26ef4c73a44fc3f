//! Relay Endpoint core.
//!
//! [`Relay::handle`] turns one [`RelayRequest`] into either a chunk stream
//! (upstream or simulated) or a completed [`Generation`]. HTTP framing lives
//! in `api::chat`; this module knows nothing about axum.

pub mod credentials;
pub mod simulate;
pub mod transform;
pub mod types;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{Config, UpstreamFailureMode};
use crate::providers::types::{Generation, ProviderKind, ReasoningConfig, UpstreamRequest};
use crate::providers::{ProviderFactory, ResolvedCredentials, TextStream, UpstreamError};
use crate::relay::simulate::TokenDelay;
use crate::relay::types::{AgentChatPayload, RelayRequest, RequestCredentials};

/// Where streamed chunks come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Upstream,
    Simulated,
}

pub enum RelayOutcome {
    Stream {
        source: StreamSource,
        chunks: TextStream,
    },
    /// Reasoning mode: one blocking call, returned whole.
    Complete(Generation),
}

impl std::fmt::Debug for RelayOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream { source, .. } => f.debug_struct("Stream").field("source", source).finish(),
            Self::Complete(generation) => f.debug_tuple("Complete").field(generation).finish(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// Provider chosen for an agent: ids mentioning `claude` go to Bedrock.
pub fn agent_provider(agent_id: &str) -> ProviderKind {
    if agent_id.to_lowercase().contains("claude") {
        ProviderKind::Bedrock
    } else {
        ProviderKind::OpenAi
    }
}

pub struct Relay {
    config: Arc<Config>,
    factory: Arc<dyn ProviderFactory>,
}

impl Relay {
    pub fn new(config: Arc<Config>, factory: Arc<dyn ProviderFactory>) -> Self {
        Self { config, factory }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build the request for the agent route. The agent decides provider and
    /// model; credentials come from configuration only.
    pub fn agent_request(&self, payload: AgentChatPayload) -> Result<RelayRequest, RelayError> {
        if payload.agent_id.trim().is_empty() {
            return Err(RelayError::InvalidRequest("agentId must not be empty".into()));
        }
        let provider = agent_provider(&payload.agent_id);
        let model = match provider {
            ProviderKind::Bedrock => self.config.providers.bedrock.default_model.clone(),
            ProviderKind::OpenAi => self.config.providers.openai.default_model.clone(),
        };
        debug!(agent_id = %payload.agent_id, %provider, %model, "Resolved agent route");

        Ok(RelayRequest {
            conversation: payload.messages,
            provider,
            model: Some(model),
            reasoning_requested: payload.enable_reasoning,
            credentials: RequestCredentials::default(),
            system_prompt: Some(self.config.relay.agent_system_prompt.clone()),
        })
    }

    fn token_delay(&self) -> TokenDelay {
        TokenDelay::from(&self.config.simulation)
    }

    fn default_model(&self, provider: ProviderKind) -> &str {
        match provider {
            ProviderKind::OpenAi => &self.config.providers.openai.default_model,
            ProviderKind::Bedrock => &self.config.providers.bedrock.default_model,
        }
    }

    /// Serve one relay request.
    pub async fn handle(&self, request: RelayRequest) -> Result<RelayOutcome, RelayError> {
        if request.conversation.is_empty() {
            return Err(RelayError::InvalidRequest(
                "conversation must contain at least one message".into(),
            ));
        }

        let provider = request.provider;
        let Some(credentials) =
            credentials::resolve(provider, &request.credentials, &self.config.providers)
        else {
            info!(%provider, "No credentials available; serving simulated reply");
            let text = simulate::no_credentials_reply(provider, &request.conversation);
            return Ok(RelayOutcome::Stream {
                source: StreamSource::Simulated,
                chunks: simulate::simulated_stream(&text, self.token_delay()),
            });
        };

        let upstream = self.upstream_request(&request)?;

        match self.dispatch(&credentials, &upstream).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                warn!(%provider, model = %upstream.model, error = %err, "Upstream call failed");
                match self.config.relay.on_upstream_error {
                    UpstreamFailureMode::Envelope => Err(err.into()),
                    UpstreamFailureMode::Simulate => {
                        let text = simulate::upstream_failure_reply(provider, &err);
                        Ok(RelayOutcome::Stream {
                            source: StreamSource::Simulated,
                            chunks: simulate::simulated_stream(&text, self.token_delay()),
                        })
                    }
                }
            }
        }
    }

    fn upstream_request(&self, request: &RelayRequest) -> Result<UpstreamRequest, RelayError> {
        let relay = &self.config.relay;
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model(request.provider).to_string());
        let system_prompt = request
            .system_prompt
            .as_deref()
            .unwrap_or(&relay.system_prompt);

        let prepared =
            transform::prepare(&request.conversation, system_prompt, &relay.greeting_markers)?;

        let reasoning = if request.reasoning_requested {
            if relay.supports_reasoning(&model) {
                Some(ReasoningConfig {
                    budget_tokens: relay.reasoning_budget_tokens,
                })
            } else {
                debug!(%model, "Reasoning requested for a model outside the allow-list; streaming instead");
                None
            }
        } else {
            None
        };

        Ok(UpstreamRequest {
            model,
            system: prepared.system,
            temperature: relay.temperature,
            max_tokens: self.config.providers.bedrock.max_tokens,
            messages: prepared.messages,
            reasoning,
        })
    }

    async fn dispatch(
        &self,
        credentials: &ResolvedCredentials,
        request: &UpstreamRequest,
    ) -> Result<RelayOutcome, UpstreamError> {
        let provider = self.factory.build(credentials).await?;

        if request.reasoning.is_some() {
            info!(provider = %provider.kind(), model = %request.model, "Relaying in reasoning mode");
            let generation = provider.generate(request).await?;
            return Ok(RelayOutcome::Complete(generation));
        }

        info!(provider = %provider.kind(), model = %request.model, "Relaying stream");
        let chunks = provider.stream(request).await?;
        Ok(RelayOutcome::Stream {
            source: StreamSource::Upstream,
            chunks,
        })
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

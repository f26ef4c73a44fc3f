use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::client::consumer::consume_response;
use crate::client::{ChatSession, ClientError};
use crate::net::HttpClient;
use crate::providers::types::ProviderKind;
use crate::relay::types::{AgentChatPayload, Attachment, ChatPayload};

/// Per-submission options.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
    pub reasoning: bool,
    /// Route through `/api/agents/chat` with this agent id.
    pub agent_id: Option<String>,
}

/// HTTP client for the relay routes.
#[derive(Debug, Clone)]
pub struct RelayClient {
    http: HttpClient,
    base_url: Url,
    session_token: Option<String>,
}

impl RelayClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Self::with_http(HttpClient::builder().streaming().build(), base_url)
    }

    pub fn with_http(http: HttpClient, base_url: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Transport(format!("invalid relay URL {base_url}: {e}")))?;
        Ok(Self {
            http,
            base_url,
            session_token: None,
        })
    }

    /// Send this session token as a Bearer credential.
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Submit `text` and stream the reply into `session`.
    pub async fn chat(
        &self,
        session: &mut ChatSession,
        text: &str,
        attachments: Vec<Attachment>,
        options: &ChatOptions,
        cancel: &CancellationToken,
        on_update: impl FnMut(&ChatSession),
    ) -> Result<(), ClientError> {
        session.submit(text, attachments)?;
        self.send(session, options, cancel, on_update).await
    }

    /// Post the session's conversation and apply the response to it.
    pub async fn send(
        &self,
        session: &mut ChatSession,
        options: &ChatOptions,
        cancel: &CancellationToken,
        mut on_update: impl FnMut(&ChatSession),
    ) -> Result<(), ClientError> {
        let (route, body) = match &options.agent_id {
            Some(agent_id) => (
                "/api/agents/chat",
                serde_json::to_value(AgentChatPayload {
                    agent_id: agent_id.clone(),
                    messages: session.messages().to_vec(),
                    enable_reasoning: options.reasoning,
                }),
            ),
            None => (
                "/api/chat",
                serde_json::to_value(ChatPayload {
                    messages: session.messages().to_vec(),
                    provider: options.provider,
                    model: options.model.clone(),
                    enable_reasoning: options.reasoning,
                    ..ChatPayload::default()
                }),
            ),
        };
        let body = body.map_err(|e| session.fail(ClientError::Decode(e.to_string())))?;
        let url = self
            .base_url
            .join(route)
            .map_err(|e| session.fail(ClientError::Transport(e.to_string())))?;

        let request_id = Uuid::new_v4().to_string();
        tracing::debug!(
            request_id = %request_id,
            url = %url,
            messages = session.messages().len(),
            "Sending chat request"
        );

        let mut request = self
            .http
            .inner()
            .post(url)
            .header("x-request-id", &request_id)
            .json(&body);
        if let Some(token) = &self.session_token {
            request = request.bearer_auth(token);
        }

        let response = tokio::select! {
            () = cancel.cancelled() => {
                let err = session.fail(ClientError::Cancelled);
                on_update(session);
                return Err(err);
            }
            response = request.send() => response,
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                let err = session.fail(ClientError::Transport(e.to_string()));
                on_update(session);
                return Err(err);
            }
        };

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        tracing::debug!(request_id = %request_id, status, content_type = ?content_type, "Relay responded");

        consume_response(
            session,
            status,
            content_type.as_deref(),
            response.bytes_stream().boxed(),
            cancel,
            on_update,
        )
        .await
    }
}

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::Extension;
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use uuid::Uuid;

use crate::AppState;
use crate::auth::SessionUser;
use crate::error::{AppError, ErrorEnvelope};
use crate::net::DONE_SENTINEL;
use crate::providers::TextStream;
use crate::relay::types::{AgentChatPayload, ChatPayload, RelayRequest};
use crate::relay::{RelayOutcome, StreamSource};

/// POST /api/chat
///
/// Relay with a caller-selected provider and optional per-request
/// credentials. Streams SSE text chunks, or returns a JSON [`Generation`]
/// in reasoning mode.
///
/// [`Generation`]: crate::providers::types::Generation
pub async fn relay_chat(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let payload: ChatPayload = serde_json::from_slice(&body)?;
    let request_id = request_id(&headers);

    tracing::info!(
        request_id = %request_id,
        user = %user.user,
        provider = ?payload.provider,
        model = ?payload.model,
        messages = payload.messages.len(),
        reasoning = payload.enable_reasoning,
        "Chat request"
    );

    let request = payload.into_request(state.config.providers.default);
    respond(&state, request, request_id).await
}

/// POST /api/agents/chat
///
/// Same relay, with the provider and model chosen from the agent id and
/// credentials taken from configuration only.
pub async fn relay_agent_chat(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let payload: AgentChatPayload = serde_json::from_slice(&body)?;
    let request_id = request_id(&headers);

    tracing::info!(
        request_id = %request_id,
        user = %user.user,
        agent_id = %payload.agent_id,
        messages = payload.messages.len(),
        reasoning = payload.enable_reasoning,
        "Agent chat request"
    );

    let request = state.relay.agent_request(payload)?;
    respond(&state, request, request_id).await
}

/// Id set by the request-id layer, or a fresh one when called without it.
fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

async fn respond(
    state: &AppState,
    request: RelayRequest,
    request_id: String,
) -> Result<Response, AppError> {
    match state.relay.handle(request).await? {
        RelayOutcome::Complete(generation) => {
            tracing::info!(
                request_id = %request_id,
                chars = generation.text.len(),
                has_reasoning = generation.reasoning.is_some(),
                "Reasoning reply complete"
            );
            Ok(Json(generation).into_response())
        }
        RelayOutcome::Stream { source, chunks } => {
            let events = RelayEventStream::new(chunks, source, request_id);
            Ok(Sse::new(events)
                .keep_alive(KeepAlive::default())
                .into_response())
        }
    }
}

// ---------------------------------------------------------------------------
// RelayEventStream
// ---------------------------------------------------------------------------

/// Frames relay chunks as SSE: one `data: {"text":…}` event per chunk, an
/// `event: error` envelope if the upstream fails mid-stream, and a final
/// `data: [DONE]`. Nothing is read from upstream after an error.
struct RelayEventStream {
    inner: TextStream,
    /// Whether the inner stream has finished (we still need to emit [DONE]).
    inner_done: bool,
    /// Whether the [DONE] sentinel has been sent.
    done_sent: bool,

    source: StreamSource,
    request_id: String,
    start: Instant,
    chunks: usize,
    errored: bool,
}

impl RelayEventStream {
    fn new(inner: TextStream, source: StreamSource, request_id: String) -> Self {
        Self {
            inner,
            inner_done: false,
            done_sent: false,
            source,
            request_id,
            start: Instant::now(),
            chunks: 0,
            errored: false,
        }
    }
}

fn chunk_event(text: &str) -> Event {
    Event::default().data(serde_json::json!({ "text": text }).to_string())
}

fn error_event(envelope: &ErrorEnvelope) -> Event {
    Event::default()
        .event("error")
        .data(serde_json::to_string(envelope).unwrap_or_default())
}

impl Stream for RelayEventStream {
    type Item = Result<Event, std::convert::Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        // Phase 1: drain the chunk stream.
        if !this.inner_done {
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(text))) => {
                    this.chunks += 1;
                    return Poll::Ready(Some(Ok(chunk_event(&text))));
                }
                Poll::Ready(Some(Err(err))) => {
                    this.inner_done = true;
                    this.errored = true;
                    tracing::warn!(
                        request_id = %this.request_id,
                        chunks = this.chunks,
                        error = %err,
                        "Upstream failed mid-stream"
                    );
                    return Poll::Ready(Some(Ok(error_event(&ErrorEnvelope::from(&err)))));
                }
                Poll::Ready(None) => {
                    this.inner_done = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        // Phase 2: send the [DONE] sentinel.
        if !this.done_sent {
            this.done_sent = true;
            tracing::info!(
                request_id = %this.request_id,
                source = ?this.source,
                chunks = this.chunks,
                errored = this.errored,
                elapsed_ms = this.start.elapsed().as_millis() as u64,
                "Stream finished"
            );
            return Poll::Ready(Some(Ok(Event::default().data(DONE_SENTINEL))));
        }

        Poll::Ready(None)
    }
}

impl Drop for RelayEventStream {
    fn drop(&mut self) {
        if !self.done_sent {
            // Dropping `inner` here cancels the upstream request.
            tracing::info!(
                request_id = %self.request_id,
                chunks = self.chunks,
                "Client disconnected; stream cancelled"
            );
        }
    }
}

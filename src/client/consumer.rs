//! Apply a relay HTTP response to a [`ChatSession`].
//!
//! Event-stream bodies are decoded incrementally and every chunk is appended
//! to one assistant placeholder; JSON bodies are applied in one update. The
//! `[DONE]` sentinel only marks a frame to skip: reading continues until the
//! byte source itself ends.

use std::fmt::Display;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::client::{ChatSession, ChatState, ClientError};
use crate::error::ErrorEnvelope;
use crate::net::{SseEvent, SseStream};
use crate::providers::types::Generation;

/// Incremental payload of one data frame.
#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

fn is_event_stream(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("text/event-stream"))
}

/// Apply a complete relay response to `session`.
///
/// `on_update` runs after every change to the session. On failure the
/// session is left in `Errored` and the same error is returned.
pub async fn consume_response<S, E>(
    session: &mut ChatSession,
    status: u16,
    content_type: Option<&str>,
    body: S,
    cancel: &CancellationToken,
    mut on_update: impl FnMut(&ChatSession),
) -> Result<(), ClientError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    if !(200..300).contains(&status) {
        let body = read_body(body, cancel).await.unwrap_or_default();
        let err = session.fail(error_from_status(status, &body));
        on_update(session);
        return Err(err);
    }

    if is_event_stream(content_type) {
        return consume_stream(session, body, cancel, on_update).await;
    }

    let body = match read_body(body, cancel).await {
        Ok(body) => body,
        Err(err) => {
            let err = session.fail(err);
            on_update(session);
            return Err(err);
        }
    };
    match serde_json::from_slice::<Generation>(&body) {
        Ok(generation) => {
            session.apply_generation(generation);
            on_update(session);
            Ok(())
        }
        Err(e) => {
            let err = session.fail(ClientError::Decode(e.to_string()));
            on_update(session);
            Err(err)
        }
    }
}

/// Read an event-stream body into the session, chunk by chunk.
pub async fn consume_stream<S, E>(
    session: &mut ChatSession,
    body: S,
    cancel: &CancellationToken,
    mut on_update: impl FnMut(&ChatSession),
) -> Result<(), ClientError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    let mut events = SseStream::new(body);
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => {
                let err = session.fail(ClientError::Cancelled);
                on_update(session);
                return Err(err);
            }
            next = events.next() => next,
        };

        match next {
            None => break,
            Some(Err(e)) => {
                let err = session.fail(ClientError::Transport(e.to_string()));
                on_update(session);
                return Err(err);
            }
            Some(Ok(event)) => {
                if session.state() != &ChatState::Streaming {
                    session.begin_stream();
                }
                if let Some(err) = apply_event(session, &event) {
                    let err = session.fail(err);
                    on_update(session);
                    return Err(err);
                }
                on_update(session);
            }
        }
    }

    // A body that ended without a single frame still yields an (empty) reply.
    if session.state() != &ChatState::Streaming {
        session.begin_stream();
    }
    session.complete();
    on_update(session);
    Ok(())
}

/// Apply one frame. Returns an error only for `event: error` frames.
fn apply_event(session: &mut ChatSession, event: &SseEvent) -> Option<ClientError> {
    if event.event.as_deref() == Some("error") {
        return Some(stream_error(&event.data));
    }
    if !event.is_message() || event.is_done() {
        return None;
    }

    match serde_json::from_str::<StreamFrame>(&event.data) {
        Ok(frame) => {
            if let Some(text) = frame.text {
                session.append_text(&text);
            }
            if let Some(reasoning) = frame.reasoning {
                session.append_reasoning(&reasoning);
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, data = %event.data, "Skipping unparseable stream frame");
        }
    }
    None
}

fn stream_error(data: &str) -> ClientError {
    match serde_json::from_str::<ErrorEnvelope>(data) {
        Ok(envelope) => ClientError::Stream {
            message: envelope_message(&envelope.error, envelope.details.as_deref()),
            code: envelope.code,
        },
        Err(_) => ClientError::Stream {
            code: "stream_error".to_string(),
            message: if data.trim().is_empty() {
                "The reply stream failed".to_string()
            } else {
                data.to_string()
            },
        },
    }
}

fn envelope_message(error: &str, details: Option<&str>) -> String {
    match details.filter(|d| !d.is_empty()) {
        Some(details) if !error.is_empty() => format!("{error}: {details}"),
        Some(details) => details.to_string(),
        None => error.to_string(),
    }
}

/// Error for a non-2xx response: envelope fields when the body is one,
/// otherwise the status text.
pub fn error_from_status(status: u16, body: &[u8]) -> ClientError {
    #[derive(Deserialize)]
    struct LooseEnvelope {
        #[serde(default)]
        error: String,
        #[serde(default)]
        details: Option<String>,
    }

    let from_body = serde_json::from_slice::<LooseEnvelope>(body)
        .ok()
        .map(|e| envelope_message(&e.error, e.details.as_deref()))
        .filter(|m| !m.is_empty());

    let message = from_body.unwrap_or_else(|| {
        reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {status}"))
    });

    ClientError::Http { status, message }
}

async fn read_body<S, E>(mut body: S, cancel: &CancellationToken) -> Result<Vec<u8>, ClientError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    let mut buf = Vec::new();
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return Err(ClientError::Cancelled),
            next = body.next() => next,
        };
        match next {
            Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
            Some(Err(e)) => return Err(ClientError::Transport(e.to_string())),
            None => return Ok(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::time::Duration;

    fn body(chunks: Vec<&'static [u8]>) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Unpin {
        stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c))).collect::<Vec<_>>())
    }

    fn submitted() -> ChatSession {
        let mut session = ChatSession::new();
        session.submit("hello", vec![]).unwrap();
        session
    }

    #[tokio::test]
    async fn test_stream_appends_chunks_and_ignores_done() {
        let mut session = submitted();
        let mut updates = Vec::new();
        let result = consume_response(
            &mut session,
            200,
            Some("text/event-stream"),
            body(vec![
                b"data: {\"text\":\"Hel\"}\n\n",
                b"data: {\"text\":\"lo\"}\n\ndata: [DONE]\n\n",
                // Frames after the sentinel are still applied.
                b"data: {\"text\":\"!\"}\n\n",
            ]),
            &CancellationToken::new(),
            |s| updates.push((s.state().clone(), s.last_reply().unwrap_or_default())),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(updates[0], (ChatState::Streaming, "Hel".to_string()));
        assert_eq!(session.last_reply().as_deref(), Some("Hello!"));
        assert_eq!(session.state(), &ChatState::Complete);
        assert!(!session.last_reply().unwrap().contains("[DONE]"));
    }

    #[tokio::test]
    async fn test_stays_awaiting_until_first_frame() {
        let mut session = submitted();
        let body = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b": ping\n\n"))])
            .chain(stream::pending());
        let mut updates = 0;
        let result = tokio::time::timeout(
            Duration::from_millis(50),
            consume_stream(&mut session, body, &CancellationToken::new(), |_| updates += 1),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(updates, 0);
        assert_eq!(session.state(), &ChatState::AwaitingFirstByte);
        assert_eq!(session.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_body_completes_with_empty_reply() {
        let mut session = submitted();
        consume_stream(&mut session, body(vec![]), &CancellationToken::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(session.state(), &ChatState::Complete);
        assert_eq!(session.last_reply().as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_error_event_split_on_crlf_is_not_dropped() {
        let mut session = submitted();
        let result = consume_stream(
            &mut session,
            body(vec![
                b"data: {\"text\":\"partial\"}\r\n\r\nevent: error\r",
                b"\ndata: {\"error\":\"Model unavailable\",\"code\":\"model_unavailable\",\"timestamp\":\"x\"}\r\n\r\n",
            ]),
            &CancellationToken::new(),
            |_| {},
        )
        .await;

        assert!(matches!(
            result,
            Err(ClientError::Stream { ref code, .. }) if code == "model_unavailable"
        ));
        assert_eq!(session.last_reply().as_deref(), Some("partial"));
    }

    #[tokio::test]
    async fn test_multibyte_split_across_chunks() {
        let full = "data: {\"text\":\"你好\"}\n\n".as_bytes();
        let (a, b) = full.split_at(17);
        let chunks: Vec<Result<Bytes, std::io::Error>> =
            vec![Ok(Bytes::copy_from_slice(a)), Ok(Bytes::copy_from_slice(b))];
        let mut session = submitted();
        consume_stream(&mut session, stream::iter(chunks), &CancellationToken::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(session.last_reply().as_deref(), Some("你好"));
    }

    #[tokio::test]
    async fn test_bad_frames_are_skipped() {
        let mut session = submitted();
        consume_stream(
            &mut session,
            body(vec![
                b"data: not json\n\n",
                b"data: {\"text\":\"ok\",\"reasoning\":\"why\"}\n\n",
                b": keep-alive\n\n",
            ]),
            &CancellationToken::new(),
            |_| {},
        )
        .await
        .unwrap();
        assert_eq!(session.last_reply().as_deref(), Some("ok"));
        assert_eq!(session.reasoning(), Some("why"));
    }

    #[tokio::test]
    async fn test_error_event_keeps_partial_text() {
        let mut session = submitted();
        let result = consume_stream(
            &mut session,
            body(vec![
                b"data: {\"text\":\"partial\"}\n\n",
                b"event: error\ndata: {\"error\":\"Model unavailable\",\"code\":\"model_unavailable\",\"details\":\"throttled\",\"timestamp\":\"2024-01-01T00:00:00Z\"}\n\n",
                b"data: [DONE]\n\n",
            ]),
            &CancellationToken::new(),
            |_| {},
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(
            err,
            ClientError::Stream {
                code: "model_unavailable".into(),
                message: "Model unavailable: throttled".into()
            }
        );
        assert_eq!(session.state(), &ChatState::Errored(err));
        assert_eq!(session.last_reply().as_deref(), Some("partial"));
    }

    #[tokio::test]
    async fn test_non_2xx_surfaces_envelope_message() {
        let mut session = submitted();
        let err = consume_response(
            &mut session,
            403,
            Some("application/json"),
            body(vec![b"{\"error\":\"Permission denied\",\"code\":\"permission_denied\",\"details\":\"no model access\",\"timestamp\":\"x\"}"]),
            &CancellationToken::new(),
            |_| {},
        )
        .await
        .unwrap_err();

        match &err {
            ClientError::Http { status, message } => {
                assert_eq!(*status, 403);
                assert_eq!(message, "Permission denied: no model access");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(session.state(), ChatState::Errored(_)));
        assert_eq!(session.messages().len(), 1);
    }

    #[test]
    fn test_non_2xx_without_envelope_uses_status_text() {
        let err = error_from_status(502, b"<html>bad gateway</html>");
        assert_eq!(
            err,
            ClientError::Http {
                status: 502,
                message: "Bad Gateway".into()
            }
        );
        assert!(!err.to_string().is_empty());
    }

    #[tokio::test]
    async fn test_json_body_applied_in_one_update() {
        let mut session = submitted();
        let mut calls = 0;
        consume_response(
            &mut session,
            200,
            Some("application/json"),
            body(vec![b"{\"text\":\"answer\",", b"\"reasoning\":\"steps\"}"]),
            &CancellationToken::new(),
            |_| calls += 1,
        )
        .await
        .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(session.last_reply().as_deref(), Some("answer"));
        assert_eq!(session.reasoning(), Some("steps"));
    }

    #[tokio::test]
    async fn test_transport_error_mid_stream() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: {\"text\":\"a\"}\n\n")),
            Err(std::io::Error::other("connection reset")),
        ];
        let mut session = submitted();
        let err = consume_stream(&mut session, stream::iter(chunks), &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Transport(ref m) if m.contains("connection reset")));
        assert_eq!(session.last_reply().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_reading() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut session = submitted();
        let pending = stream::pending::<Result<Bytes, std::io::Error>>();
        let err = consume_stream(&mut session, pending, &cancel, |_| {})
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::Cancelled);
    }
}

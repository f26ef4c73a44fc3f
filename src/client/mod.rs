//! Stream Consumer: the client side of the relay.
//!
//! A [`ChatSession`] owns the conversation and an explicit [`ChatState`].
//! [`consumer`] applies a relay response to a session chunk by chunk and
//! [`http::RelayClient`] drives the whole round trip over HTTP.

pub mod attachment;
pub mod consumer;
pub mod http;

use crate::providers::types::Generation;
use crate::relay::types::{Attachment, ConversationMessage, MessageContent, Role};

pub use attachment::load_attachment;
pub use consumer::{consume_response, consume_stream};
pub use http::{ChatOptions, RelayClient};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("Nothing to send")]
    EmptySubmission,

    #[error("A reply is still in progress")]
    Busy,

    #[error("Relay returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("{message} ({code})")]
    Stream { code: String, message: String },

    #[error("Connection failed: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Attachment error: {0}")]
    Attachment(String),

    #[error("Request cancelled")]
    Cancelled,
}

/// Lifecycle of one submission.
///
/// `Idle -> AwaitingFirstByte -> Streaming -> Complete`, with any in-flight
/// state able to move to `Errored`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ChatState {
    #[default]
    Idle,
    AwaitingFirstByte,
    Streaming,
    Complete,
    Errored(ClientError),
}

impl ChatState {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::AwaitingFirstByte | Self::Streaming)
    }
}

/// Single source of truth for a conversation on the client.
#[derive(Debug, Clone, Default)]
pub struct ChatSession {
    messages: Vec<ConversationMessage>,
    state: ChatState,
    /// Reasoning trace for the latest assistant reply.
    reasoning: Option<String>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume with an existing conversation, for example one restored from storage.
    pub fn with_messages(messages: Vec<ConversationMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn reasoning(&self) -> Option<&str> {
        self.reasoning.as_deref()
    }

    /// Text of the last assistant message, if the conversation ends with one.
    pub fn last_reply(&self) -> Option<String> {
        self.messages
            .last()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.content.text())
    }

    /// Append a user message and enter `AwaitingFirstByte`. Returns the
    /// conversation to send.
    pub fn submit(
        &mut self,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> Result<Vec<ConversationMessage>, ClientError> {
        if self.state.is_in_flight() {
            return Err(ClientError::Busy);
        }
        if text.trim().is_empty() && attachments.is_empty() {
            return Err(ClientError::EmptySubmission);
        }

        self.messages.push(ConversationMessage {
            role: Role::User,
            content: MessageContent::Text(text.to_string()),
            attachments,
        });
        self.reasoning = None;
        self.state = ChatState::AwaitingFirstByte;
        Ok(self.messages.clone())
    }

    /// Add the empty assistant placeholder that streamed chunks extend.
    /// Called once the first frame of the body has arrived.
    pub(crate) fn begin_stream(&mut self) {
        self.messages.push(ConversationMessage::assistant(""));
        self.state = ChatState::Streaming;
    }

    pub(crate) fn append_text(&mut self, chunk: &str) {
        if let Some(ConversationMessage {
            role: Role::Assistant,
            content: MessageContent::Text(text),
            ..
        }) = self.messages.last_mut()
        {
            text.push_str(chunk);
        }
    }

    pub(crate) fn append_reasoning(&mut self, chunk: &str) {
        self.reasoning.get_or_insert_with(String::new).push_str(chunk);
    }

    /// Apply a whole (reasoning-mode) reply in one update.
    pub(crate) fn apply_generation(&mut self, generation: Generation) {
        self.messages.push(ConversationMessage::assistant(generation.text));
        self.reasoning = generation.reasoning;
        self.state = ChatState::Complete;
    }

    pub(crate) fn complete(&mut self) {
        self.state = ChatState::Complete;
    }

    /// Enter `Errored`. Messages, including partial streamed text, are kept.
    pub(crate) fn fail(&mut self, error: ClientError) -> ClientError {
        self.state = ChatState::Errored(error.clone());
        error
    }

    /// Clear the error banner.
    pub fn dismiss_error(&mut self) {
        if matches!(self.state, ChatState::Errored(_)) {
            self.state = ChatState::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::types::AttachmentKind;

    #[test]
    fn test_submit_refuses_empty_input() {
        let mut session = ChatSession::new();
        assert_eq!(session.submit("   ", vec![]), Err(ClientError::EmptySubmission));
        assert!(session.messages().is_empty());
        assert_eq!(session.state(), &ChatState::Idle);
    }

    #[test]
    fn test_attachment_only_submission_is_allowed() {
        let mut session = ChatSession::new();
        let attachment = Attachment {
            kind: AttachmentKind::Image,
            data: "aW1n".into(),
            media_type: Some("image/png".into()),
            name: Some("cat.png".into()),
            size: Some(3),
        };
        let sent = session.submit("", vec![attachment]).unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].has_attachments());
    }

    #[test]
    fn test_submit_refused_while_in_flight() {
        let mut session = ChatSession::new();
        session.submit("first", vec![]).unwrap();
        assert_eq!(session.state(), &ChatState::AwaitingFirstByte);
        assert_eq!(session.submit("second", vec![]), Err(ClientError::Busy));

        session.begin_stream();
        assert_eq!(session.submit("second", vec![]), Err(ClientError::Busy));
        assert_eq!(session.messages().len(), 2);
    }

    #[test]
    fn test_streaming_appends_to_placeholder() {
        let mut session = ChatSession::new();
        session.submit("hi", vec![]).unwrap();
        session.begin_stream();
        session.append_text("Hel");
        session.append_text("lo");
        session.complete();
        assert_eq!(session.last_reply().as_deref(), Some("Hello"));
        assert_eq!(session.state(), &ChatState::Complete);
    }

    #[test]
    fn test_error_keeps_partial_text_and_can_be_dismissed() {
        let mut session = ChatSession::new();
        session.submit("hi", vec![]).unwrap();
        session.begin_stream();
        session.append_text("partial");
        session.fail(ClientError::Transport("reset".into()));

        assert!(matches!(session.state(), ChatState::Errored(_)));
        assert_eq!(session.last_reply().as_deref(), Some("partial"));

        session.dismiss_error();
        assert_eq!(session.state(), &ChatState::Idle);
        assert_eq!(session.messages().len(), 2);
        session.submit("again", vec![]).unwrap();
    }

    #[test]
    fn test_apply_generation() {
        let mut session = ChatSession::new();
        session.submit("think", vec![]).unwrap();
        session.apply_generation(Generation {
            text: "answer".into(),
            reasoning: Some("steps".into()),
            reasoning_details: None,
        });
        assert_eq!(session.last_reply().as_deref(), Some("answer"));
        assert_eq!(session.reasoning(), Some("steps"));
        assert_eq!(session.state(), &ChatState::Complete);
    }
}

//! Conversation normalization before upstream dispatch.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use tracing::debug;

use crate::providers::UpstreamError;
use crate::providers::types::{UpstreamMessage, UpstreamPart, UpstreamRole};
use crate::relay::types::{Attachment, AttachmentKind, ContentPart, ConversationMessage, MessageContent, Role};

const DEFAULT_IMAGE_TYPE: &str = "image/jpeg";
const DEFAULT_FILE_TYPE: &str = "application/octet-stream";

/// A conversation ready for an upstream adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedConversation {
    pub system: String,
    pub messages: Vec<UpstreamMessage>,
}

/// True when `conversation[0]` is an assistant greeting the upstream model
/// must not see.
pub fn has_leading_greeting(conversation: &[ConversationMessage], markers: &[String]) -> bool {
    let Some(first) = conversation.first() else {
        return false;
    };
    if first.role != Role::Assistant {
        return false;
    }
    let text = first.content.text();
    markers
        .iter()
        .any(|m| !m.is_empty() && text.contains(m.as_str()))
}

/// Normalize a conversation into upstream messages.
///
/// System-role messages are folded into the system instruction. Messages with
/// nothing renderable are dropped. Fails with a validation error when a
/// payload is not valid base64 or when nothing is left to send.
pub fn prepare(
    conversation: &[ConversationMessage],
    system_prompt: &str,
    greeting_markers: &[String],
) -> Result<PreparedConversation, UpstreamError> {
    let skip = usize::from(has_leading_greeting(conversation, greeting_markers));
    if skip == 1 {
        debug!("Dropping leading assistant greeting");
    }

    let mut system = system_prompt.to_string();
    let mut messages = Vec::with_capacity(conversation.len());

    for (index, message) in conversation.iter().enumerate().skip(skip) {
        let role = match message.role {
            Role::System => {
                let text = message.content.text();
                if !text.trim().is_empty() {
                    if !system.is_empty() {
                        system.push_str("\n\n");
                    }
                    system.push_str(text.trim());
                }
                continue;
            }
            Role::User => UpstreamRole::User,
            Role::Assistant => UpstreamRole::Assistant,
        };

        let parts = normalize_parts(index, message)?;
        if parts.is_empty() {
            debug!(index, "Dropping message with no renderable content");
            continue;
        }
        messages.push(UpstreamMessage { role, parts });
    }

    if messages.is_empty() {
        return Err(UpstreamError::Validation(
            "Conversation has no renderable messages".to_string(),
        ));
    }

    Ok(PreparedConversation { system, messages })
}

fn normalize_parts(index: usize, message: &ConversationMessage) -> Result<Vec<UpstreamPart>, UpstreamError> {
    let mut parts = Vec::new();

    match &message.content {
        MessageContent::Text(text) => {
            if !text.trim().is_empty() {
                parts.push(UpstreamPart::Text(text.clone()));
            }
        }
        MessageContent::Parts(content) => {
            for part in content {
                match part {
                    ContentPart::Text { text } => {
                        if !text.trim().is_empty() {
                            parts.push(UpstreamPart::Text(text.clone()));
                        }
                    }
                    ContentPart::Image { data, media_type } => {
                        parts.push(binary_part(index, data, media_type.as_deref(), true, None)?);
                    }
                    ContentPart::File {
                        data,
                        media_type,
                        name,
                    } => {
                        parts.push(binary_part(
                            index,
                            data,
                            media_type.as_deref(),
                            false,
                            name.clone(),
                        )?);
                    }
                }
            }
        }
    }

    for attachment in &message.attachments {
        parts.push(attachment_part(index, attachment)?);
    }

    Ok(parts)
}

fn attachment_part(index: usize, attachment: &Attachment) -> Result<UpstreamPart, UpstreamError> {
    binary_part(
        index,
        &attachment.data,
        attachment.media_type.as_deref(),
        attachment.kind == AttachmentKind::Image,
        attachment.name.clone(),
    )
}

/// Decode one base64 payload. A `data:<type>;base64,` prefix supplies the
/// media type when none is given explicitly; otherwise it is inferred from
/// the part kind. Files with an `image/*` type are sent as images.
fn binary_part(
    index: usize,
    data: &str,
    media_type: Option<&str>,
    is_image: bool,
    name: Option<String>,
) -> Result<UpstreamPart, UpstreamError> {
    let (url_type, payload) = split_data_url(data);
    let bytes = BASE64.decode(payload.trim()).map_err(|e| {
        UpstreamError::Validation(format!(
            "Message {index} carries an attachment that is not valid base64: {e}"
        ))
    })?;

    let media_type = media_type
        .filter(|m| !m.is_empty())
        .or(url_type)
        .unwrap_or(if is_image { DEFAULT_IMAGE_TYPE } else { DEFAULT_FILE_TYPE })
        .to_string();

    let data = Bytes::from(bytes);
    if is_image || media_type.starts_with("image/") {
        Ok(UpstreamPart::Image { data, media_type })
    } else {
        Ok(UpstreamPart::File {
            data,
            media_type,
            name,
        })
    }
}

fn split_data_url(data: &str) -> (Option<&str>, &str) {
    if let Some(rest) = data.strip_prefix("data:") {
        if let Some((header, payload)) = rest.split_once(',') {
            if let Some(media_type) = header.strip_suffix(";base64") {
                let media_type = (!media_type.is_empty()).then_some(media_type);
                return (media_type, payload);
            }
        }
    }
    (None, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> Vec<String> {
        vec!["您好".into(), "有什么可以帮您".into(), "How can I help".into()]
    }

    #[test]
    fn test_leading_greeting_is_dropped() {
        let conversation = vec![
            ConversationMessage::assistant("您好！有什么可以帮您？"),
            ConversationMessage::user("hi"),
        ];
        let prepared = prepare(&conversation, "sys", &markers()).unwrap();
        assert_eq!(prepared.messages.len(), 1);
        assert_eq!(prepared.messages[0].role, UpstreamRole::User);
    }

    #[test]
    fn test_non_greeting_leading_assistant_is_kept() {
        let conversation = vec![
            ConversationMessage::assistant("Earlier answer"),
            ConversationMessage::user("follow-up"),
        ];
        let prepared = prepare(&conversation, "sys", &markers()).unwrap();
        assert_eq!(prepared.messages.len(), 2);
        assert_eq!(prepared.messages[0].role, UpstreamRole::Assistant);
    }

    #[test]
    fn test_greeting_later_in_conversation_is_kept() {
        let conversation = vec![
            ConversationMessage::user("hi"),
            ConversationMessage::assistant("How can I help?"),
            ConversationMessage::user("tell me a joke"),
        ];
        let prepared = prepare(&conversation, "sys", &markers()).unwrap();
        assert_eq!(prepared.messages.len(), 3);
    }

    #[test]
    fn test_system_messages_fold_into_instruction() {
        let conversation = vec![
            ConversationMessage {
                role: Role::System,
                content: MessageContent::Text("Answer in French.".into()),
                attachments: Vec::new(),
            },
            ConversationMessage::user("hello"),
        ];
        let prepared = prepare(&conversation, "Be helpful.", &markers()).unwrap();
        assert_eq!(prepared.system, "Be helpful.\n\nAnswer in French.");
        assert_eq!(prepared.messages.len(), 1);
    }

    #[test]
    fn test_parts_are_decoded_with_inferred_media_types() {
        let conversation = vec![ConversationMessage {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: "see".into() },
                ContentPart::Image {
                    data: "aW1n".into(),
                    media_type: None,
                },
                ContentPart::File {
                    data: "ZmlsZQ==".into(),
                    media_type: None,
                    name: Some("blob.bin".into()),
                },
            ]),
            attachments: Vec::new(),
        }];
        let prepared = prepare(&conversation, "", &markers()).unwrap();
        let parts = &prepared.messages[0].parts;
        assert_eq!(parts[0], UpstreamPart::Text("see".into()));
        assert_eq!(
            parts[1],
            UpstreamPart::Image {
                data: Bytes::from_static(b"img"),
                media_type: "image/jpeg".into()
            }
        );
        assert_eq!(
            parts[2],
            UpstreamPart::File {
                data: Bytes::from_static(b"file"),
                media_type: "application/octet-stream".into(),
                name: Some("blob.bin".into())
            }
        );
    }

    #[test]
    fn test_attachments_follow_text() {
        let conversation = vec![ConversationMessage {
            role: Role::User,
            content: MessageContent::Text("summarize this".into()),
            attachments: vec![Attachment {
                kind: AttachmentKind::File,
                data: "data:application/pdf;base64,JVBERg==".into(),
                media_type: None,
                name: Some("doc.pdf".into()),
                size: Some(4),
            }],
        }];
        let prepared = prepare(&conversation, "", &markers()).unwrap();
        let parts = &prepared.messages[0].parts;
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], UpstreamPart::Text("summarize this".into()));
        match &parts[1] {
            UpstreamPart::File {
                data, media_type, ..
            } => {
                assert_eq!(data.as_ref(), b"%PDF");
                assert_eq!(media_type, "application/pdf");
            }
            other => panic!("unexpected part: {other:?}"),
        }
    }

    #[test]
    fn test_image_typed_file_becomes_image() {
        let conversation = vec![ConversationMessage {
            role: Role::User,
            content: MessageContent::Text(String::new()),
            attachments: vec![Attachment {
                kind: AttachmentKind::File,
                data: "aW1n".into(),
                media_type: Some("image/png".into()),
                name: None,
                size: None,
            }],
        }];
        let prepared = prepare(&conversation, "", &markers()).unwrap();
        assert!(matches!(prepared.messages[0].parts[0], UpstreamPart::Image { .. }));
    }

    #[test]
    fn test_invalid_base64_is_validation_error() {
        let conversation = vec![ConversationMessage {
            role: Role::User,
            content: MessageContent::Parts(vec![ContentPart::Image {
                data: "***not base64***".into(),
                media_type: Some("image/png".into()),
            }]),
            attachments: Vec::new(),
        }];
        let err = prepare(&conversation, "", &markers()).unwrap_err();
        assert!(matches!(err, UpstreamError::Validation(_)));
    }

    #[test]
    fn test_empty_messages_are_dropped_and_empty_result_rejected() {
        let conversation = vec![ConversationMessage::user("   ")];
        let err = prepare(&conversation, "", &markers()).unwrap_err();
        assert!(matches!(err, UpstreamError::Validation(_)));

        let conversation = vec![ConversationMessage::user(""), ConversationMessage::user("real")];
        let prepared = prepare(&conversation, "", &markers()).unwrap();
        assert_eq!(prepared.messages.len(), 1);
    }

    #[test]
    fn test_split_data_url() {
        assert_eq!(split_data_url("data:image/png;base64,AAAA"), (Some("image/png"), "AAAA"));
        assert_eq!(split_data_url("AAAA"), (None, "AAAA"));
        assert_eq!(split_data_url("data:;base64,AAAA"), (None, "AAAA"));
    }
}

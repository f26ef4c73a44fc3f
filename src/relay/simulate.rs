//! Simulated fallback stream and canned replies.
//!
//! Used when no credentials are available (and, optionally, when an upstream
//! call fails). The stream is lazy: dropping it stops emission.

use std::time::Duration;

use futures::StreamExt;
use rand::Rng;

use crate::config::SimulationConfig;
use crate::providers::types::ProviderKind;
use crate::providers::{TextStream, UpstreamError};
use crate::relay::types::ConversationMessage;

/// Split on single spaces; every token is the piece plus one trailing space.
pub fn split_tokens(text: &str) -> Vec<String> {
    text.split(' ').map(|piece| format!("{piece} ")).collect()
}

/// Random per-token delay range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenDelay {
    min: Duration,
    max: Duration,
}

impl TokenDelay {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min: min.min(max),
            max: max.max(min),
        }
    }

    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    fn sample(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let millis = rand::rng().random_range(self.min.as_millis()..=self.max.as_millis());
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }
}

impl From<&SimulationConfig> for TokenDelay {
    fn from(config: &SimulationConfig) -> Self {
        Self::new(
            Duration::from_millis(config.min_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }
}

/// Emit `text` token by token, sleeping a random delay before each token.
pub fn simulated_stream(text: &str, delay: TokenDelay) -> TextStream {
    let stream = futures::stream::iter(split_tokens(text)).then(move |token| {
        let pause = delay.sample();
        async move {
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            Ok::<_, UpstreamError>(token)
        }
    });
    Box::pin(stream)
}

/// Reply used when the selected provider has no credentials.
pub fn no_credentials_reply(provider: ProviderKind, conversation: &[ConversationMessage]) -> String {
    format!(
        "The system has no valid {} configured. This is a simulated reply.\n\n{}",
        provider.credential_label(),
        canned_reply(conversation)
    )
}

/// Reply used when an upstream call fails and the relay is set to simulate.
pub fn upstream_failure_reply(provider: ProviderKind, error: &UpstreamError) -> String {
    format!(
        "The {} credentials appear to be invalid or an error occurred. \
         This is a simulated reply. Error details: {error}",
        provider.display_name()
    )
}

/// Pick a canned reply from the last message of the conversation.
pub fn canned_reply(conversation: &[ConversationMessage]) -> String {
    let Some(last) = conversation.last() else {
        return generic_reply("your message");
    };

    if last.has_attachments() {
        return "I received the file you uploaded. This is a simulated reply, so I cannot \
                analyze its contents. With a configured provider the assistant would read \
                the file and respond to it."
            .to_string();
    }

    let text = last.content.text();
    let words = ascii_words(&text);
    let has_word = |candidates: &[&str]| words.iter().any(|w| candidates.contains(&w.as_str()));

    if text.contains("你好") || text.contains('嗨') || has_word(&["hi", "hello"]) {
        return "Hello! I am a simulated AI assistant and glad to help. Without provider \
                credentials I can only give preset replies."
            .to_string();
    }

    if text.contains("时间") || text.contains("日期") || has_word(&["time", "date"]) {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        return format!(
            "The current time is {now}. This is a simulated reply; a real model would \
             answer your question more precisely."
        );
    }

    if text.contains("天气") || has_word(&["weather"]) {
        return "I am a simulated assistant and cannot fetch live weather information. A real \
                model might suggest checking a weather service for an accurate forecast."
            .to_string();
    }

    if text.contains("功能")
        || text.contains("能力")
        || has_word(&["capability", "capabilities", "features"])
    {
        return "As an AI assistant I can answer questions, analyze images and documents and \
                help draft content. This is a simulated reply; a configured model would respond \
                according to its capabilities."
            .to_string();
    }

    if last.content.is_plain_text() {
        generic_reply(&text)
    } else {
        generic_reply("your message")
    }
}

fn generic_reply(question: &str) -> String {
    format!(
        "This is a simulated AI response because no valid provider credentials are \
         configured. Your question was: \"{question}\". Configure valid credentials to get a \
         real answer."
    )
}

fn ascii_words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

//! Server-Sent Events framing.
//!
//! [`SseParser`] is the incremental core: feed it raw bytes as they arrive
//! and it hands back every frame completed so far. [`SseStream`] wraps any
//! byte stream with the same parser. Payloads are not interpreted here.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::Stream;
use pin_project_lite::pin_project;

/// Data payload that marks the logical end of a relay stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    /// True when the payload is the `[DONE]` sentinel.
    pub fn is_done(&self) -> bool {
        self.data == DONE_SENTINEL
    }

    /// True for frames carrying regular data (no event name or `message`).
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }
}

// ---------------------------------------------------------------------------
// Utf8Decoder
// ---------------------------------------------------------------------------

/// Incremental UTF-8 decoder.
///
/// Holds back a trailing partial character until the next chunk completes
/// it. Invalid sequences are replaced with U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `pending + chunk` as forms complete characters.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());
        let mut consumed = 0;

        loop {
            let rest = &self.pending[consumed..];
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    consumed = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid_up_to]));
                    consumed += valid_up_to;
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            consumed += bad;
                        }
                        // Incomplete sequence at the end: wait for more bytes.
                        None => break,
                    }
                }
            }
        }

        self.pending.drain(..consumed);
        out
    }

    /// Flush whatever is still pending at end of input.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

// ---------------------------------------------------------------------------
// SseParser
// ---------------------------------------------------------------------------

/// Incremental SSE frame parser.
#[derive(Debug, Default)]
pub struct SseParser {
    decoder: Utf8Decoder,
    buffer: String,
    /// A chunk ended in `\r`; its line ending is only known once the next
    /// chunk shows whether a `\n` follows.
    pending_cr: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every frame completed by them.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let text = self.decoder.decode(chunk);
        self.push_text(&text);
        self.drain_complete()
    }

    /// Flush trailing frames once the byte source has ended.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let tail = self.decoder.finish();
        self.push_text(&tail);
        if std::mem::take(&mut self.pending_cr) {
            self.buffer.push('\n');
        }
        let mut events = self.drain_complete();
        if !self.buffer.trim().is_empty() {
            if let Some(event) = parse_sse_block(&self.buffer) {
                events.push(event);
            }
        }
        self.buffer.clear();
        events
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut text = text;
        if std::mem::take(&mut self.pending_cr) {
            self.buffer.push('\n');
            text = text.strip_prefix('\n').unwrap_or(text);
        }
        if let Some(rest) = text.strip_suffix('\r') {
            self.pending_cr = true;
            text = rest;
        }

        if text.contains('\r') {
            self.buffer.push_str(&text.replace("\r\n", "\n").replace('\r', "\n"));
        } else {
            self.buffer.push_str(text);
        }
    }

    fn drain_complete(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos).collect();
            self.buffer.drain(..2);
            if let Some(event) = parse_sse_block(&block) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_sse_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data = String::new();
    let mut has_data = false;
    let mut id = None;

    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        if let Some(value) = line.strip_prefix("data:") {
            if has_data {
                data.push('\n');
            }
            has_data = true;
            data.push_str(value.strip_prefix(' ').unwrap_or(value));
        } else if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.strip_prefix(' ').unwrap_or(value).to_string());
        } else if let Some(value) = line.strip_prefix("id:") {
            id = Some(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
    }

    if !has_data && event.is_none() && id.is_none() {
        return None;
    }

    Some(SseEvent { event, data, id })
}

// ---------------------------------------------------------------------------
// SseStream
// ---------------------------------------------------------------------------

pin_project! {
    /// Stream adapter yielding [`SseEvent`]s from a byte stream.
    pub struct SseStream<S> {
        #[pin]
        byte_stream: S,
        parser: SseParser,
        pending_events: VecDeque<SseEvent>,
        finished: bool,
    }
}

impl<S, E> SseStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    pub fn new(byte_stream: S) -> Self {
        Self {
            byte_stream,
            parser: SseParser::new(),
            pending_events: VecDeque::new(),
            finished: false,
        }
    }
}

impl<S, E> Stream for SseStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    type Item = Result<SseEvent, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(event) = this.pending_events.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if *this.finished {
                return Poll::Ready(None);
            }

            match this.byte_stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.pending_events.extend(this.parser.feed(&chunk));
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => {
                    *this.finished = true;
                    this.pending_events.extend(this.parser.finish());
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

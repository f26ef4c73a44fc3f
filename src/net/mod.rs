//! Shared networking infrastructure.

pub mod client;
pub mod sse;

pub use client::{HttpClient, HttpClientBuilder};
pub use sse::{DONE_SENTINEL, SseEvent, SseParser, SseStream, Utf8Decoder};

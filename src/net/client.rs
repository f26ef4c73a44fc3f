//! HTTP client shared by the upstream adapters and the stream consumer.

use std::time::Duration;

use reqwest::{Client, ClientBuilder};

/// Default user agent for outbound requests.
pub const USER_AGENT: &str = concat!("agentrelay/", env!("CARGO_PKG_VERSION"));

/// Default connection timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default whole-request timeout.
///
/// Applies to blocking calls. Streaming clients are built with
/// [`HttpClientBuilder::streaming`], which only bounds idle reads.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Longest silence tolerated between two chunks of a streamed body.
pub const READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Thin wrapper over a configured [`reqwest::Client`].
///
/// Cloning is cheap; the inner client is reference counted.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    /// Client with default timeouts.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    pub fn inner(&self) -> &Client {
        &self.inner
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder {
    connect_timeout: Duration,
    request_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            request_timeout: Some(REQUEST_TIMEOUT),
            read_timeout: None,
        }
    }
}

impl HttpClientBuilder {
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Drop the whole-request timeout in favour of a per-read timeout, so a
    /// long but steadily flowing stream is never cut off.
    pub fn streaming(mut self) -> Self {
        self.request_timeout = None;
        self.read_timeout = Some(READ_TIMEOUT);
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> HttpClient {
        let mut builder: ClientBuilder = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(self.connect_timeout);
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = self.read_timeout {
            builder = builder.read_timeout(timeout);
        }

        let inner = match builder.build() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build HTTP client with custom config; using defaults");
                Client::default()
            }
        };
        HttpClient { inner }
    }
}

//! agentrelay: streaming chat relay between a browser chat UI and hosted
//! LLM providers (OpenAI-compatible and Amazon Bedrock), plus the client-side
//! stream consumer.

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod net;
pub mod providers;
pub mod relay;

use std::sync::Arc;

use crate::auth::{SessionVerifier, StaticSessionVerifier};
use crate::config::Config;
use crate::providers::ProviderFactory;
use crate::relay::Relay;

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub relay: Arc<Relay>,
    pub sessions: Arc<dyn SessionVerifier>,
}

impl AppState {
    /// State with the configured static session list.
    pub fn new(config: Arc<Config>, factory: Arc<dyn ProviderFactory>) -> Self {
        let sessions = Arc::new(StaticSessionVerifier::from_config(&config.auth));
        Self::with_sessions(config, factory, sessions)
    }

    pub fn with_sessions(
        config: Arc<Config>,
        factory: Arc<dyn ProviderFactory>,
        sessions: Arc<dyn SessionVerifier>,
    ) -> Self {
        let relay = Arc::new(Relay::new(config.clone(), factory));
        Self {
            config,
            relay,
            sessions,
        }
    }
}

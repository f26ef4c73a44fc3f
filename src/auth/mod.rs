//! Session gate for the chat routes.
//!
//! The identity provider is external; all the relay needs is to know whether
//! a presented session token belongs to a signed-in user.

pub mod middleware;

use std::collections::HashMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::AuthConfig;

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "agentrelay_session";

/// Signed-in user attached to request extensions by the auth middleware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionUser {
    pub user: String,
}

impl SessionUser {
    pub fn anonymous() -> Self {
        Self {
            user: "anonymous".to_string(),
        }
    }
}

/// Checks a presented session token.
pub trait SessionVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Option<SessionUser>;
}

/// Lowercase hex SHA-256 of a session token.
pub fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Verifier backed by the `[[auth.sessions]]` list in the configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticSessionVerifier {
    /// token digest -> user
    sessions: HashMap<String, String>,
}

impl StaticSessionVerifier {
    pub fn from_config(config: &AuthConfig) -> Self {
        let sessions = config
            .sessions
            .iter()
            .map(|s| (s.token_sha256.trim().to_lowercase(), s.user.clone()))
            .collect();
        Self { sessions }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionVerifier for StaticSessionVerifier {
    fn verify(&self, token: &str) -> Option<SessionUser> {
        self.sessions
            .get(&hash_token(token))
            .map(|user| SessionUser { user: user.clone() })
    }
}

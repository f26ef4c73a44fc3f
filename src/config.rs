use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::providers::types::ProviderKind;

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings were replaced by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
}

impl EnvOverrides {
    /// All overrides as a map of setting key -> env var name.
    pub fn all(&self) -> &HashMap<String, String> {
        &self.overrides
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Env var overrides are not serialized to TOML.
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Master switch: when false, chat routes are accessible without a session.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Known sessions. Only the SHA-256 of each token is stored.
    #[serde(default)]
    pub sessions: Vec<SessionEntry>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sessions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionEntry {
    pub user: String,
    /// Lowercase hex SHA-256 of the session token.
    pub token_sha256: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProvidersConfig {
    /// Provider used when a request does not name one.
    #[serde(default)]
    pub default: ProviderKind,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub bedrock: BedrockConfig,
}

#[derive(Clone, Deserialize, Serialize)]
pub struct OpenAiConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_openai_model")]
    pub default_model: String,
    /// Longest silence tolerated between two streamed chunks.
    #[serde(default = "default_openai_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_openai_base_url(),
            default_model: default_openai_model(),
            timeout_secs: default_openai_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("timeout_secs", &self.timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct BedrockConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
    #[serde(default = "default_aws_region")]
    pub region: String,
    #[serde(default = "default_bedrock_model")]
    pub default_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for BedrockConfig {
    fn default() -> Self {
        Self {
            access_key_id: None,
            secret_access_key: None,
            region: default_aws_region(),
            default_model: default_bedrock_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl fmt::Debug for BedrockConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BedrockConfig")
            .field("access_key_id", &self.access_key_id.as_ref().map(|_| "<redacted>"))
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("region", &self.region)
            .field("default_model", &self.default_model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// What the relay does when an upstream call fails before streaming starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamFailureMode {
    /// Structured JSON error envelope with a status derived from the error class.
    #[default]
    Envelope,
    /// Simulated stream carrying a readable explanation.
    Simulate,
}

impl fmt::Display for UpstreamFailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Envelope => write!(f, "envelope"),
            Self::Simulate => write!(f, "simulate"),
        }
    }
}

impl FromStr for UpstreamFailureMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "envelope" | "error" => Ok(Self::Envelope),
            "simulate" | "fallback" => Ok(Self::Simulate),
            _ => Err(format!("Unknown upstream failure mode: {s}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// System instruction for the agent route.
    #[serde(default = "default_agent_system_prompt")]
    pub agent_system_prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// A leading assistant message containing any of these is dropped.
    #[serde(default = "default_greeting_markers")]
    pub greeting_markers: Vec<String>,
    /// Reasoning mode is honoured only for models whose id contains one of these.
    #[serde(default = "default_reasoning_models")]
    pub reasoning_models: Vec<String>,
    #[serde(default = "default_reasoning_budget")]
    pub reasoning_budget_tokens: u32,
    #[serde(default)]
    pub on_upstream_error: UpstreamFailureMode,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            agent_system_prompt: default_agent_system_prompt(),
            temperature: default_temperature(),
            greeting_markers: default_greeting_markers(),
            reasoning_models: default_reasoning_models(),
            reasoning_budget_tokens: default_reasoning_budget(),
            on_upstream_error: UpstreamFailureMode::default(),
        }
    }
}

impl RelayConfig {
    pub fn supports_reasoning(&self, model: &str) -> bool {
        self.reasoning_models
            .iter()
            .any(|m| !m.is_empty() && model.contains(m.as_str()))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    #[serde(default = "default_min_delay")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "127.0.0.1".to_string()
}
const fn default_port() -> u16 {
    8400
}
const fn default_true() -> bool {
    true
}
fn default_openai_base_url() -> String {
    crate::providers::openai::DEFAULT_BASE_URL.to_string()
}
fn default_openai_model() -> String {
    "gpt-4o".to_string()
}
const fn default_openai_timeout() -> u64 {
    120
}
const fn default_connect_timeout() -> u64 {
    10
}
fn default_aws_region() -> String {
    "us-east-1".to_string()
}
fn default_bedrock_model() -> String {
    "anthropic.claude-3-sonnet-20240229-v1:0".to_string()
}
const fn default_max_tokens() -> u32 {
    4096
}
fn default_system_prompt() -> String {
    "You are a helpful assistant that can answer questions and analyze images and documents."
        .to_string()
}
fn default_agent_system_prompt() -> String {
    "You are a helpful AI agent that can answer questions and analyze content.".to_string()
}
const fn default_temperature() -> f32 {
    0.7
}
fn default_greeting_markers() -> Vec<String> {
    ["您好", "有什么可以帮您", "How can I help"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_reasoning_models() -> Vec<String> {
    vec!["claude-3".to_string()]
}
const fn default_reasoning_budget() -> u32 {
    2048
}
const fn default_min_delay() -> u64 {
    50
}
const fn default_max_delay() -> u64 {
    200
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Config loading and env overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. A missing file yields defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.simulation.min_delay_ms > self.simulation.max_delay_ms {
            anyhow::bail!(
                "simulation.min_delay_ms ({}) exceeds simulation.max_delay_ms ({})",
                self.simulation.min_delay_ms,
                self.simulation.max_delay_ms
            );
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Provider credentials use the conventional `OPENAI_*` / `AWS_*` names;
    /// everything else is prefixed with `AGENTRELAY_`.
    fn apply_env_overrides(&mut self) {
        let mut ov = EnvOverrides::default();

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                        ov.record($key, $env);
                    } else {
                        tracing::warn!(env = $env, value = %val, "Ignoring unparseable override");
                    }
                }
            };
        }
        macro_rules! env_opt_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = if val.is_empty() { None } else { Some(val) };
                    ov.record($key, $env);
                }
            };
        }

        // -- Server --
        env_str!("server.host", "AGENTRELAY_SERVER_HOST", self.server.host);
        env_parse!("server.port", "AGENTRELAY_SERVER_PORT", self.server.port);
        if let Ok(val) = std::env::var("AGENTRELAY_SERVER_CORS_ORIGINS") {
            self.server.cors_origins = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            ov.record("server.cors_origins", "AGENTRELAY_SERVER_CORS_ORIGINS");
        }

        // -- Auth --
        env_bool!("auth.enabled", "AGENTRELAY_AUTH_ENABLED", self.auth.enabled);

        // -- Providers --
        env_parse!(
            "providers.default",
            "AGENTRELAY_DEFAULT_PROVIDER",
            self.providers.default
        );
        env_opt_str!(
            "providers.openai.api_key",
            "OPENAI_API_KEY",
            self.providers.openai.api_key
        );
        env_str!(
            "providers.openai.base_url",
            "OPENAI_BASE_URL",
            self.providers.openai.base_url
        );
        env_opt_str!(
            "providers.bedrock.access_key_id",
            "AWS_ACCESS_KEY_ID",
            self.providers.bedrock.access_key_id
        );
        env_opt_str!(
            "providers.bedrock.secret_access_key",
            "AWS_SECRET_ACCESS_KEY",
            self.providers.bedrock.secret_access_key
        );
        env_str!(
            "providers.bedrock.region",
            "AWS_REGION",
            self.providers.bedrock.region
        );

        // -- Relay --
        env_parse!(
            "relay.on_upstream_error",
            "AGENTRELAY_ON_UPSTREAM_ERROR",
            self.relay.on_upstream_error
        );

        // -- Logging --
        env_str!("logging.level", "AGENTRELAY_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "AGENTRELAY_LOG_JSON", self.logging.json);

        self.env_overrides = ov;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

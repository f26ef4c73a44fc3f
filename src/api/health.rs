use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;
use crate::config::ProvidersConfig;
use crate::providers::types::ProviderKind;
use crate::relay::credentials;
use crate::relay::types::RequestCredentials;

#[derive(Debug, Serialize)]
pub struct ProviderStatus {
    pub provider: ProviderKind,
    /// Server-side credentials are present; requests without their own
    /// credentials get a real upstream reply instead of a simulated one.
    pub configured: bool,
    pub default_model: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub default_provider: ProviderKind,
    pub providers: Vec<ProviderStatus>,
}

/// GET /health
///
/// Liveness plus which providers have server-side credentials.
/// No authentication required.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let providers = &state.config.providers;
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        default_provider: providers.default,
        providers: provider_statuses(providers),
    })
}

fn provider_statuses(config: &ProvidersConfig) -> Vec<ProviderStatus> {
    let none = RequestCredentials::default();
    [ProviderKind::OpenAi, ProviderKind::Bedrock]
        .into_iter()
        .map(|provider| ProviderStatus {
            provider,
            configured: credentials::resolve(provider, &none, config).is_some(),
            default_model: match provider {
                ProviderKind::OpenAi => config.openai.default_model.clone(),
                ProviderKind::Bedrock => config.bedrock.default_model.clone(),
            },
        })
        .collect()
}

//! Credential resolution: request-supplied values first, then configuration.

use crate::config::ProvidersConfig;
use crate::providers::types::ProviderKind;
use crate::providers::{BedrockCredentials, OpenAiCredentials, ResolvedCredentials};
use crate::relay::types::RequestCredentials;

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Resolve credentials for `provider`, or `None` when neither the request
/// nor the configuration supplies a usable set.
///
/// Bedrock needs access key id, secret key and region together: a complete
/// request triple wins, a partial one is ignored.
pub fn resolve(
    provider: ProviderKind,
    request: &RequestCredentials,
    config: &ProvidersConfig,
) -> Option<ResolvedCredentials> {
    match provider {
        ProviderKind::OpenAi => {
            let api_key = present(&request.api_key).or_else(|| present(&config.openai.api_key))?;
            Some(ResolvedCredentials::OpenAi(OpenAiCredentials {
                api_key: api_key.to_string(),
                base_url: config.openai.base_url.clone(),
            }))
        }
        ProviderKind::Bedrock => {
            let from_request = match (
                present(&request.aws_access_key_id),
                present(&request.aws_secret_access_key),
                present(&request.aws_region),
            ) {
                (Some(key), Some(secret), Some(region)) => Some((key, secret, region)),
                _ => None,
            };

            let (key, secret, region) = from_request.or_else(|| {
                let region = config.bedrock.region.trim();
                match (
                    present(&config.bedrock.access_key_id),
                    present(&config.bedrock.secret_access_key),
                ) {
                    (Some(key), Some(secret)) if !region.is_empty() => Some((key, secret, region)),
                    _ => None,
                }
            })?;

            Some(ResolvedCredentials::Bedrock(BedrockCredentials {
                access_key_id: key.to_string(),
                secret_access_key: secret.to_string(),
                region: region.to_string(),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> ProvidersConfig {
        let mut config = ProvidersConfig::default();
        config.openai.api_key = Some("sk-config".into());
        config.bedrock.access_key_id = Some("AKIACONFIG".into());
        config.bedrock.secret_access_key = Some("config-secret".into());
        config.bedrock.region = "us-west-2".into();
        config
    }

    #[test]
    fn test_nothing_configured_resolves_to_none() {
        let config = ProvidersConfig::default();
        let request = RequestCredentials::default();
        assert!(resolve(ProviderKind::OpenAi, &request, &config).is_none());
        assert!(resolve(ProviderKind::Bedrock, &request, &config).is_none());
    }

    #[test]
    fn test_request_api_key_takes_priority() {
        let request = RequestCredentials {
            api_key: Some("sk-request".into()),
            ..Default::default()
        };
        match resolve(ProviderKind::OpenAi, &request, &configured()) {
            Some(ResolvedCredentials::OpenAi(c)) => assert_eq!(c.api_key, "sk-request"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_blank_request_key_falls_back_to_config() {
        let request = RequestCredentials {
            api_key: Some("   ".into()),
            ..Default::default()
        };
        match resolve(ProviderKind::OpenAi, &request, &configured()) {
            Some(ResolvedCredentials::OpenAi(c)) => assert_eq!(c.api_key, "sk-config"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_complete_request_triple_wins() {
        let request = RequestCredentials {
            aws_access_key_id: Some("AKIAREQ".into()),
            aws_secret_access_key: Some("req-secret".into()),
            aws_region: Some("eu-central-1".into()),
            ..Default::default()
        };
        match resolve(ProviderKind::Bedrock, &request, &configured()) {
            Some(ResolvedCredentials::Bedrock(c)) => {
                assert_eq!(c.access_key_id, "AKIAREQ");
                assert_eq!(c.region, "eu-central-1");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_partial_request_triple_is_ignored() {
        let request = RequestCredentials {
            aws_access_key_id: Some("AKIAREQ".into()),
            aws_secret_access_key: Some("req-secret".into()),
            aws_region: None,
            ..Default::default()
        };
        match resolve(ProviderKind::Bedrock, &request, &configured()) {
            Some(ResolvedCredentials::Bedrock(c)) => {
                assert_eq!(c.access_key_id, "AKIACONFIG");
                assert_eq!(c.region, "us-west-2");
            }
            other => panic!("unexpected: {other:?}"),
        }

        // Partial request and nothing configured: no credentials at all.
        assert!(resolve(ProviderKind::Bedrock, &request, &ProvidersConfig::default()).is_none());
    }

    #[test]
    fn test_openai_key_does_not_satisfy_bedrock() {
        let request = RequestCredentials {
            api_key: Some("sk-request".into()),
            ..Default::default()
        };
        assert!(resolve(ProviderKind::Bedrock, &request, &ProvidersConfig::default()).is_none());
    }
}

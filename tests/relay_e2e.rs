//! End-to-end: real router on an ephemeral port, real provider factory
//! against a mocked OpenAI-compatible upstream, driven by the Stream Consumer.

use std::sync::Arc;

use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use agentrelay::AppState;
use agentrelay::api::build_app;
use agentrelay::auth::hash_token;
use agentrelay::client::{ChatOptions, ChatSession, ChatState, ClientError, RelayClient};
use agentrelay::config::{Config, SessionEntry};
use agentrelay::providers::SdkProviderFactory;
use agentrelay::providers::types::ProviderKind;
use agentrelay::relay::types::{Attachment, AttachmentKind};

const SESSION_TOKEN: &str = "e2e-session";

fn base_config() -> Config {
    let mut config = Config::default();
    config.auth.sessions = vec![SessionEntry {
        user: "tester".into(),
        token_sha256: hash_token(SESSION_TOKEN),
    }];
    config.simulation.min_delay_ms = 0;
    config.simulation.max_delay_ms = 1;
    config
}

fn with_openai(mut config: Config, upstream: &MockServer) -> Config {
    config.providers.openai.api_key = Some("sk-e2e".into());
    config.providers.openai.base_url = format!("{}/v1", upstream.uri());
    config
}

async fn spawn_relay(config: Config) -> String {
    let state = AppState::new(Arc::new(config), Arc::new(SdkProviderFactory::default()));
    let app = build_app(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn client(url: &str) -> RelayClient {
    RelayClient::new(url)
        .unwrap()
        .with_session_token(SESSION_TOKEN)
}

fn openai() -> ChatOptions {
    ChatOptions {
        provider: Some(ProviderKind::OpenAi),
        ..ChatOptions::default()
    }
}

#[tokio::test]
async fn streams_upstream_reply_into_session() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-e2e"))
        .and(body_partial_json(json!({ "model": "gpt-4o", "stream": true })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(concat!(
                    "data: {\"choices\":[{\"delta\":{\"content\":\"Bonjour\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\", monde\"}}]}\n\n",
                    "data: [DONE]\n\n",
                )),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let url = spawn_relay(with_openai(base_config(), &upstream)).await;
    let mut session = ChatSession::new();
    let mut snapshots = Vec::new();
    client(&url)
        .chat(&mut session, "Say hello in French", vec![], &openai(), &CancellationToken::new(), |s| {
            snapshots.push(s.last_reply().unwrap_or_default())
        })
        .await
        .unwrap();

    assert_eq!(session.state(), &ChatState::Complete);
    assert_eq!(session.last_reply().as_deref(), Some("Bonjour, monde"));
    assert!(snapshots.iter().any(|s| s == "Bonjour"));
    assert_eq!(session.messages().len(), 2);
}

#[tokio::test]
async fn simulates_when_no_credentials_are_configured() {
    let url = spawn_relay(base_config()).await;
    let mut session = ChatSession::new();
    client(&url)
        .chat(&mut session, "你好", vec![], &openai(), &CancellationToken::new(), |_| {})
        .await
        .unwrap();

    let reply = session.last_reply().unwrap();
    assert!(reply.starts_with("The system has no valid OpenAI API key configured."));
    assert!(reply.contains("Hello! I am a simulated AI assistant"));
}

#[tokio::test]
async fn attachment_without_text_gets_file_reply() {
    let url = spawn_relay(base_config()).await;
    let mut session = ChatSession::new();
    let notes = Attachment {
        kind: AttachmentKind::File,
        data: "bm90ZXM=".into(),
        media_type: Some("text/plain".into()),
        name: Some("notes.txt".into()),
        size: Some(5),
    };
    client(&url)
        .chat(&mut session, "", vec![notes], &openai(), &CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(session.state(), &ChatState::Complete);
    let reply = session.last_reply().unwrap();
    assert!(reply.contains("I received the file"), "{reply}");
    assert!(!reply.contains("Hello! I am a simulated AI assistant"));
}

#[tokio::test]
async fn upstream_rejection_surfaces_as_error_envelope() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "message": "Incorrect API key provided" }
        })))
        .mount(&upstream)
        .await;

    let url = spawn_relay(with_openai(base_config(), &upstream)).await;
    let mut session = ChatSession::new();
    let err = client(&url)
        .chat(&mut session, "hi", vec![], &openai(), &CancellationToken::new(), |_| {})
        .await
        .unwrap_err();

    match &err {
        ClientError::Http { status, message } => {
            assert_eq!(*status, 403);
            assert!(message.contains("Incorrect API key"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(session.state(), &ChatState::Errored(err));

    session.dismiss_error();
    assert_eq!(session.state(), &ChatState::Idle);
    assert_eq!(session.messages().len(), 1);
}

#[tokio::test]
async fn reasoning_mode_returns_whole_generation() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "stream": false, "reasoning_effort": "medium" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": {
                "content": "42",
                "reasoning_content": "6 times 7"
            }}]
        })))
        .mount(&upstream)
        .await;

    let mut config = with_openai(base_config(), &upstream);
    config.relay.reasoning_models = vec!["gpt-4o".into()];
    let url = spawn_relay(config).await;

    let mut session = ChatSession::new();
    let options = ChatOptions {
        reasoning: true,
        ..openai()
    };
    client(&url)
        .chat(&mut session, "What is 6 x 7?", vec![], &options, &CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(session.last_reply().as_deref(), Some("42"));
    assert_eq!(session.reasoning(), Some("6 times 7"));
}

#[tokio::test]
async fn rejects_requests_without_a_session() {
    let url = spawn_relay(base_config()).await;
    let mut session = ChatSession::new();
    let err = RelayClient::new(&url)
        .unwrap()
        .chat(&mut session, "hi", vec![], &openai(), &CancellationToken::new(), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Http { status: 401, .. }));
}

#[tokio::test]
async fn health_reports_configured_providers() {
    let upstream = MockServer::start().await;
    let url = spawn_relay(with_openai(base_config(), &upstream)).await;

    let health: serde_json::Value = reqwest::get(format!("{url}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["default_provider"], "bedrock");
    assert_eq!(health["providers"][0]["configured"], true);
    assert_eq!(health["providers"][1]["configured"], false);
}

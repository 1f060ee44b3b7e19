//! Integration tests for the HTTP provider client against a mock server

use super::test_utils::next_event;
use nexa_agent::history::ConversationTurn;
use nexa_agent::provider::{HttpProviderClient, ProviderClient};
use nexa_agent::settings::{SettingsValidator, ValidatorOptions};
use nexa_agent::store::MemoryStore;
use nexa_agent::{
    AgentError, AgentRuntime, CandidateSettings, InboundEvent, NexaConfig, RuntimeDeps,
    ServerType, ValidatedSettings,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings_for(server: &MockServer, server_type: ServerType, model: &str) -> ValidatedSettings {
    ValidatedSettings::unverified(
        &CandidateSettings::new(server_type, server.uri(), model),
        false,
    )
}

fn question() -> Vec<ConversationTurn> {
    vec![
        ConversationTurn::system("You are the Project Manager."),
        ConversationTurn::user("What is blocked?"),
    ]
}

#[tokio::test]
async fn test_lm_studio_lists_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [
                {"id": "qwen2.5-7b-instruct-1m", "object": "model"},
                {"id": "llama-3.2-3b", "object": "model"}
            ]
        })))
        .mount(&server)
        .await;

    let client = HttpProviderClient::new(Duration::from_secs(60)).unwrap();
    let models = client
        .list_models(ServerType::LmStudio, &server.uri())
        .await
        .unwrap();
    assert_eq!(models, vec!["qwen2.5-7b-instruct-1m", "llama-3.2-3b"]);
}

#[tokio::test]
async fn test_ollama_lists_tags() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "llama3:8b", "size": 4661224676u64}]
        })))
        .mount(&server)
        .await;

    let client = HttpProviderClient::new(Duration::from_secs(60)).unwrap();
    let models = client
        .list_models(ServerType::Ollama, &server.uri())
        .await
        .unwrap();
    assert_eq!(models, vec!["llama3:8b"]);
}

#[tokio::test]
async fn test_lm_studio_chat_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({
            "model": "qwen2.5-7b-instruct-1m",
            "stream": false,
            "messages": [
                {"role": "system", "content": "You are the Project Manager."},
                {"role": "user", "content": "What is blocked?"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Nothing is blocked."}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpProviderClient::new(Duration::from_secs(60)).unwrap();
    let settings = settings_for(&server, ServerType::LmStudio, "qwen2.5-7b-instruct-1m");
    let reply = client.complete(&settings, &question()).await.unwrap();
    assert_eq!(reply, "Nothing is blocked.");
}

#[tokio::test]
async fn test_ollama_generate_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({"model": "llama3:8b", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3:8b",
            "response": "The API migration is blocked on review.",
            "done": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpProviderClient::new(Duration::from_secs(60)).unwrap();
    let settings = settings_for(&server, ServerType::Ollama, "llama3:8b");
    let reply = client.complete(&settings, &question()).await.unwrap();
    assert_eq!(reply, "The API migration is blocked on review.");
}

#[tokio::test]
async fn test_error_statuses_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(404).set_body_string("model 'ghost' not found"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let client = HttpProviderClient::new(Duration::from_secs(60)).unwrap();

    let err = client
        .complete(&settings_for(&server, ServerType::Ollama, "ghost"), &question())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::ModelNotFound(_)));

    let err = client
        .complete(&settings_for(&server, ServerType::LmStudio, "qwen"), &question())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Http { status: 500, .. }));
}

#[tokio::test]
async fn test_malformed_body_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"unexpected": true})))
        .mount(&server)
        .await;

    let client = HttpProviderClient::new(Duration::from_secs(60)).unwrap();
    let err = client
        .complete(&settings_for(&server, ServerType::LmStudio, "qwen"), &question())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::MalformedResponse(_)));

    let err = client
        .list_models(ServerType::LmStudio, &server.uri())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_unreachable_server_is_connectivity_error() {
    let client = HttpProviderClient::new(Duration::from_secs(60)).unwrap();
    let err = client
        .list_models(ServerType::LmStudio, "http://127.0.0.1:9")
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Connectivity(_)));
}

#[tokio::test]
async fn test_unroutable_host_is_connectivity_error() {
    let client =
        HttpProviderClient::with_timeouts(Duration::from_millis(100), Duration::from_secs(60))
            .unwrap();
    let err = client
        .list_models(ServerType::LmStudio, "http://10.255.255.1:1234")
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Connectivity(_)), "got {err:?}");
}

#[tokio::test]
async fn test_slow_server_reports_configured_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(2))
                .set_body_json(json!({
                    "choices": [{"message": {"content": "late"}}]
                })),
        )
        .mount(&server)
        .await;

    let client =
        HttpProviderClient::with_timeouts(Duration::from_secs(10), Duration::from_millis(200))
            .unwrap();
    let err = client
        .complete(&settings_for(&server, ServerType::LmStudio, "qwen"), &question())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Timeout(d) if d == Duration::from_millis(200)));
}

#[tokio::test]
async fn test_missing_listing_endpoint_is_connectivity_error() {
    // Nothing mounted: every path answers 404.
    let server = MockServer::start().await;
    let validator = SettingsValidator::new(
        Arc::new(HttpProviderClient::new(Duration::from_secs(60)).unwrap()),
        Arc::new(MemoryStore::new()),
        ValidatorOptions {
            canonical_ports: false,
            ..Default::default()
        },
    );

    let candidate = CandidateSettings::new(ServerType::LmStudio, server.uri(), "qwen");
    let err = validator
        .validate(&candidate, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Connectivity(_)), "got {err:?}");
}

#[tokio::test]
async fn test_runtime_answers_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "qwen2.5-7b-instruct-1m"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "Two tasks are overdue."}}]
        })))
        .mount(&server)
        .await;

    let mut config = NexaConfig::default();
    config.provider.api_url = format!("{}/v1/", server.uri());
    config.provider.canonical_ports = false;

    let handle = AgentRuntime::spawn(
        &config,
        RuntimeDeps::new(
            Arc::new(HttpProviderClient::new(Duration::from_secs(60)).unwrap()),
            Arc::new(MemoryStore::new()),
        ),
    );
    let report = handle.initialize(None).await.unwrap();
    assert!(report.verified);
    assert_eq!(report.settings.api_url(), server.uri());

    let mut events = handle.events();
    handle
        .submit(InboundEvent::new("http-1", "anything overdue?"))
        .await;
    let reply = next_event(&mut events).await;
    assert_eq!(reply.message_id, "http-1-response");
    assert_eq!(reply.content, "Two tasks are overdue.");
    assert!(!reply.is_error);

    handle.shutdown().await;
}

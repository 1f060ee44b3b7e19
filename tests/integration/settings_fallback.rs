//! Integration tests for settings validation, model selection and fallback

use super::test_utils::spawn_agent;
use nexa_agent::provider::{MockFailure, MockProviderClient};
use nexa_agent::settings::{SettingsValidator, ValidatorOptions};
use nexa_agent::store::{ConversationStore, MemoryStore};
use nexa_agent::{AgentError, CandidateSettings, NexaConfig, ServerType};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn validator(provider: &Arc<MockProviderClient>, store: &Arc<MemoryStore>) -> SettingsValidator {
    SettingsValidator::new(provider.clone(), store.clone(), ValidatorOptions::default())
}

fn defaults() -> CandidateSettings {
    NexaConfig::default().provider.default_candidate()
}

#[tokio::test]
async fn test_unknown_model_prefers_qwen() {
    let provider = Arc::new(MockProviderClient::new());
    provider.set_models(
        ServerType::LmStudio,
        vec!["llama-3.2-3b", "Qwen2.5-14B-Instruct", "mistral-7b"],
    );
    let store = Arc::new(MemoryStore::new());

    let candidate = CandidateSettings::new(ServerType::LmStudio, "localhost:1234", "gpt-4");
    let settings = validator(&provider, &store)
        .validate(&candidate, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(settings.model(), "Qwen2.5-14B-Instruct");
    assert_eq!(settings.requested_model(), Some("gpt-4"));
    assert!(settings.is_verified());
    assert_eq!(store.load_settings().unwrap(), Some(settings));
}

#[tokio::test]
async fn test_no_keyword_match_uses_first_model() {
    let provider = Arc::new(MockProviderClient::new());
    provider.set_models(ServerType::Ollama, vec!["phi3:mini", "gemma2:9b"]);
    let store = Arc::new(MemoryStore::new());

    let candidate = CandidateSettings::new(ServerType::Ollama, "localhost:11434", "qwen2.5");
    let settings = validator(&provider, &store)
        .validate(&candidate, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(settings.model(), "phi3:mini");
}

#[tokio::test]
async fn test_empty_model_list_is_an_error() {
    let provider = Arc::new(MockProviderClient::new());
    provider.set_models(ServerType::LmStudio, Vec::<String>::new());
    let store = Arc::new(MemoryStore::new());

    let err = validator(&provider, &store)
        .validate(&defaults(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AgentError::NoModelsAvailable {
            server_type: ServerType::LmStudio
        }
    ));
}

#[tokio::test]
async fn test_incomplete_candidate_fails_before_network() {
    let provider = Arc::new(MockProviderClient::with_models(vec!["qwen2.5-7b-instruct-1m"]));
    let store = Arc::new(MemoryStore::new());
    let candidate = CandidateSettings {
        server_type: None,
        api_url: Some("localhost:1234".to_string()),
        model: Some("qwen2.5-7b-instruct-1m".to_string()),
        ..Default::default()
    };

    let err = validator(&provider, &store)
        .validate(&candidate, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Validation(_)));
    assert!(provider.list_calls().is_empty());
}

#[tokio::test]
async fn test_falls_back_to_other_server_type() {
    let provider = Arc::new(MockProviderClient::new());
    provider.fail_models(ServerType::LmStudio, MockFailure::Connectivity);
    provider.set_models(ServerType::Ollama, vec!["qwen2.5:7b"]);
    let store = Arc::new(MemoryStore::new());

    let resolution = validator(&provider, &store)
        .resolve(&defaults(), &defaults(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(resolution.fallback_used);
    assert_eq!(resolution.failures.len(), 1);
    assert_eq!(resolution.settings.server_type(), ServerType::Ollama);
    assert_eq!(resolution.settings.api_url(), "http://localhost:11434");
    assert_eq!(resolution.settings.model(), "qwen2.5:7b");
    assert!(resolution.settings.is_verified());
}

#[tokio::test]
async fn test_cached_settings_used_when_everything_fails() {
    let provider = Arc::new(MockProviderClient::with_models(vec!["deepseek-r1"]));
    let store = Arc::new(MemoryStore::new());
    let validator = validator(&provider, &store);
    let cancel = CancellationToken::new();

    let cached = validator.validate(&defaults(), &cancel).await.unwrap();
    assert_eq!(cached.model(), "deepseek-r1");

    provider.fail_models(ServerType::LmStudio, MockFailure::Connectivity);
    provider.fail_models(ServerType::Ollama, MockFailure::Http(503));
    let resolution = validator.resolve(&defaults(), &defaults(), &cancel).await.unwrap();

    assert!(!resolution.settings.is_verified());
    assert_eq!(resolution.settings.model(), "deepseek-r1");
    assert_eq!(resolution.failures.len(), 2);
}

#[tokio::test]
async fn test_cancelled_validation_reports_shutdown() {
    let provider = Arc::new(MockProviderClient::with_models(vec!["qwen2.5-7b-instruct-1m"]));
    let store = Arc::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = validator(&provider, &store)
        .resolve(&defaults(), &defaults(), &cancel)
        .await;
    assert!(matches!(result, Err(AgentError::Shutdown)));
}

#[tokio::test(start_paused = true)]
async fn test_initialize_normalizes_candidate_url() {
    let harness = spawn_agent(&["qwen2.5-7b-instruct-1m"]);
    let candidate = CandidateSettings::new(
        ServerType::LmStudio,
        "localhost:1234/v1/",
        "qwen2.5-7b-instruct-1m",
    );

    let report = harness.handle.initialize(Some(candidate)).await.unwrap();
    assert_eq!(report.settings.api_url(), "http://localhost:1234");
    assert_eq!(
        harness.provider.list_calls(),
        vec![(ServerType::LmStudio, "http://localhost:1234".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_unconventional_port_is_rewritten() {
    let harness = spawn_agent(&["llama3"]);
    let candidate = CandidateSettings::new(ServerType::Ollama, "http://localhost:1234", "llama3");

    let report = harness.handle.initialize(Some(candidate)).await.unwrap();
    assert_eq!(report.settings.server_type(), ServerType::Ollama);
    assert_eq!(report.settings.api_url(), "http://localhost:11434");
}

//! Model Provider Client
//!
//! HTTP access to local LLM servers: LM Studio (OpenAI-compatible `/v1` API) and
//! Ollama (`/api` API). Each call is a plain request/response; timeouts and
//! cancellation are applied by the caller.

use crate::error::{AgentError, RuntimeError};
use crate::history::{ConversationTurn, Role};
use crate::settings::{ServerType, ValidatedSettings};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub mod mock;

pub use mock::{MockFailure, MockProviderClient, MockReply};

/// Provider client trait
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// List the models the server at `base_url` can serve.
    async fn list_models(
        &self,
        server_type: ServerType,
        base_url: &str,
    ) -> Result<Vec<String>, AgentError>;

    /// Produce a single completion for `messages` with the given settings.
    async fn complete(
        &self,
        settings: &ValidatedSettings,
        messages: &[ConversationTurn],
    ) -> Result<String, AgentError>;
}

// OpenAI-compatible request structure used by LM Studio
#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    top_p: f32,
    top_k: u32,
    repeat_penalty: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

// Ollama generate request structure
#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    repeat_penalty: f32,
    num_predict: u32,
    num_ctx: u32,
}

#[derive(Deserialize)]
struct ModelsResponse {
    data: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    id: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagInfo>,
}

#[derive(Deserialize)]
struct TagInfo {
    name: String,
}

const PROVIDER_HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Map a transport failure to an `AgentError`.
///
/// Connect failures, including connect timeouts, mean the server is unreachable.
/// Only a request that outlived `request_timeout` is a timeout.
fn classify_transport(
    connect: bool,
    timed_out: bool,
    decode: bool,
    message: String,
    request_timeout: Duration,
) -> AgentError {
    if connect {
        AgentError::Connectivity(message)
    } else if timed_out {
        AgentError::Timeout(request_timeout)
    } else if decode {
        AgentError::MalformedResponse(message)
    } else {
        AgentError::Connectivity(message)
    }
}

/// Classify a non-2xx response.
///
/// Missing-model answers are reported as `ModelNotFound` so the caller can
/// re-validate; everything else keeps its status code.
fn classify_status(status: u16, body: String) -> AgentError {
    let lowered = body.to_lowercase();
    let mentions_missing_model = lowered.contains("model")
        && (lowered.contains("not found")
            || lowered.contains("not loaded")
            || lowered.contains("does not exist")
            || lowered.contains("no models loaded"));

    match status {
        404 => AgentError::ModelNotFound(body),
        400 if mentions_missing_model => AgentError::ModelNotFound(body),
        _ => AgentError::Http { status, body },
    }
}

/// Flatten chat turns into a single prompt for generate-style endpoints.
pub fn render_prompt(messages: &[ConversationTurn]) -> String {
    let mut prompt = String::new();
    for message in messages {
        let label = match message.role {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        prompt.push_str(label);
        prompt.push_str(": ");
        prompt.push_str(&message.content);
        prompt.push_str("\n\n");
    }
    prompt.push_str("Assistant:");
    prompt
}

/// Pull the completion text out of a provider response body.
fn extract_completion(server_type: ServerType, body: &Value) -> Result<String, AgentError> {
    let content = match server_type {
        ServerType::LmStudio => body
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str),
        ServerType::Ollama => body.get("response").and_then(Value::as_str),
    };

    match content {
        Some(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
        Some(_) => Err(AgentError::MalformedResponse(
            "provider returned an empty completion".to_string(),
        )),
        None => Err(AgentError::MalformedResponse(match server_type {
            ServerType::LmStudio => "missing choices[0].message.content".to_string(),
            ServerType::Ollama => "missing response field".to_string(),
        })),
    }
}

/// HTTP client for LM Studio and Ollama servers.
#[derive(Clone)]
pub struct HttpProviderClient {
    client: Client,
    request_timeout: Duration,
}

impl HttpProviderClient {
    /// Client whose requests give up after `request_timeout`.
    pub fn new(request_timeout: Duration) -> Result<Self, RuntimeError> {
        Self::with_timeouts(PROVIDER_HTTP_CONNECT_TIMEOUT, request_timeout)
    }

    pub fn with_timeouts(
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, RuntimeError> {
        let client = Client::builder()
            .no_proxy()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| RuntimeError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            request_timeout,
        })
    }

    fn map_http_error(&self, error: reqwest::Error) -> AgentError {
        classify_transport(
            error.is_connect(),
            error.is_timeout(),
            error.is_decode(),
            error.to_string(),
            self.request_timeout,
        )
    }

    async fn read_json(&self, response: reqwest::Response) -> Result<Value, AgentError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(classify_status(status.as_u16(), body));
        }
        let text = response
            .text()
            .await
            .map_err(|e| self.map_http_error(e))?;
        serde_json::from_str(&text)
            .map_err(|e| AgentError::MalformedResponse(format!("invalid JSON body: {}", e)))
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn list_models(
        &self,
        server_type: ServerType,
        base_url: &str,
    ) -> Result<Vec<String>, AgentError> {
        let url = format!("{}{}", base_url, server_type.models_path());
        debug!(url = %url, "Listing provider models");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_http_error(e))?;
        let body = self.read_json(response).await?;

        let models = match server_type {
            ServerType::LmStudio => serde_json::from_value::<ModelsResponse>(body)
                .map(|r| r.data.into_iter().map(|m| m.id).collect())
                .map_err(|e| AgentError::MalformedResponse(e.to_string()))?,
            ServerType::Ollama => serde_json::from_value::<TagsResponse>(body)
                .map(|r| r.models.into_iter().map(|m| m.name).collect())
                .map_err(|e| AgentError::MalformedResponse(e.to_string()))?,
        };
        Ok(models)
    }

    async fn complete(
        &self,
        settings: &ValidatedSettings,
        messages: &[ConversationTurn],
    ) -> Result<String, AgentError> {
        let server_type = settings.server_type();
        let params = settings.parameters();
        let url = format!("{}{}", settings.api_url(), server_type.completion_path());

        let request = match server_type {
            ServerType::LmStudio => self.client.post(&url).json(&ChatCompletionRequest {
                model: settings.model(),
                messages: messages
                    .iter()
                    .map(|m| WireMessage {
                        role: m.role.as_str(),
                        content: &m.content,
                    })
                    .collect(),
                temperature: params.temperature,
                top_p: params.top_p,
                top_k: params.top_k,
                repeat_penalty: params.repeat_penalty,
                max_tokens: params.max_tokens,
                stream: false,
            }),
            ServerType::Ollama => self.client.post(&url).json(&GenerateRequest {
                model: settings.model(),
                prompt: render_prompt(messages),
                stream: false,
                options: GenerateOptions {
                    temperature: params.temperature,
                    top_p: params.top_p,
                    top_k: params.top_k,
                    repeat_penalty: params.repeat_penalty,
                    num_predict: params.max_tokens,
                    num_ctx: params.context_length,
                },
            }),
        };

        debug!(url = %url, model = %settings.model(), turns = messages.len(), "Sending completion request");
        let response = request.send().await.map_err(|e| self.map_http_error(e))?;
        let body = self.read_json(response).await?;
        extract_completion(server_type, &body)
    }
}

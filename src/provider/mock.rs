//! Scripted provider for tests and offline runs.

use crate::error::AgentError;
use crate::history::ConversationTurn;
use crate::provider::ProviderClient;
use crate::settings::{ServerType, ValidatedSettings};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Failure a mock call should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Connectivity,
    Http(u16),
    ModelNotFound,
    Malformed,
}

impl MockFailure {
    fn to_error(self) -> AgentError {
        match self {
            MockFailure::Connectivity => {
                AgentError::Connectivity("connection refused (mock)".to_string())
            }
            MockFailure::Http(status) => AgentError::Http {
                status,
                body: "mock failure".to_string(),
            },
            MockFailure::ModelNotFound => {
                AgentError::ModelNotFound("model not found (mock)".to_string())
            }
            MockFailure::Malformed => {
                AgentError::MalformedResponse("missing completion (mock)".to_string())
            }
        }
    }
}

/// One scripted completion.
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Delayed(Duration, String),
    Fail(MockFailure),
}

/// A recorded completion call.
#[derive(Debug, Clone)]
pub struct CompletionCall {
    pub model: String,
    pub messages: Vec<ConversationTurn>,
}

#[derive(Default)]
struct MockState {
    models: HashMap<ServerType, Result<Vec<String>, MockFailure>>,
    list_delay: Option<Duration>,
    replies: VecDeque<MockReply>,
    list_calls: Vec<(ServerType, String)>,
    completion_calls: Vec<CompletionCall>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Provider double with scripted model lists and replies.
///
/// Completions without a scripted reply echo the last user message.
#[derive(Default)]
pub struct MockProviderClient {
    state: Mutex<MockState>,
}

impl MockProviderClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `models` for both server types.
    pub fn with_models<S: Into<String> + Clone>(models: Vec<S>) -> Self {
        let client = Self::new();
        client.set_models(ServerType::LmStudio, models.clone());
        client.set_models(ServerType::Ollama, models);
        client
    }

    pub fn set_models<S: Into<String>>(&self, server_type: ServerType, models: Vec<S>) {
        self.state
            .lock()
            .models
            .insert(server_type, Ok(models.into_iter().map(Into::into).collect()));
    }

    pub fn fail_models(&self, server_type: ServerType, failure: MockFailure) {
        self.state.lock().models.insert(server_type, Err(failure));
    }

    pub fn set_list_delay(&self, delay: Duration) {
        self.state.lock().list_delay = Some(delay);
    }

    pub fn push_reply(&self, reply: MockReply) {
        self.state.lock().replies.push_back(reply);
    }

    pub fn push_text(&self, text: impl Into<String>) {
        self.push_reply(MockReply::Text(text.into()));
    }

    pub fn list_calls(&self) -> Vec<(ServerType, String)> {
        self.state.lock().list_calls.clone()
    }

    pub fn completion_calls(&self) -> Vec<CompletionCall> {
        self.state.lock().completion_calls.clone()
    }

    /// Highest number of completions observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().max_in_flight
    }
}

struct InFlightGuard<'a>(&'a Mutex<MockState>);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.0.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

#[async_trait]
impl ProviderClient for MockProviderClient {
    async fn list_models(
        &self,
        server_type: ServerType,
        base_url: &str,
    ) -> Result<Vec<String>, AgentError> {
        let (result, delay) = {
            let mut state = self.state.lock();
            state.list_calls.push((server_type, base_url.to_string()));
            let result = state
                .models
                .get(&server_type)
                .cloned()
                .unwrap_or(Err(MockFailure::Connectivity));
            (result, state.list_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result.map_err(MockFailure::to_error)
    }

    async fn complete(
        &self,
        settings: &ValidatedSettings,
        messages: &[ConversationTurn],
    ) -> Result<String, AgentError> {
        let reply = {
            let mut state = self.state.lock();
            state.completion_calls.push(CompletionCall {
                model: settings.model().to_string(),
                messages: messages.to_vec(),
            });
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.replies.pop_front()
        };
        let _guard = InFlightGuard(&self.state);

        match reply {
            Some(MockReply::Text(text)) => Ok(text),
            Some(MockReply::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            Some(MockReply::Fail(failure)) => Err(failure.to_error()),
            None => {
                let last_user = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == crate::history::Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or_default();
                Ok(format!("echo: {}", last_user))
            }
        }
    }
}

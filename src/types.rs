//! Shared runtime types: UI boundary events, emitted messages and lifecycle state.

use crate::settings::CandidateSettings;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Generate a fresh message id.
pub fn new_message_id() -> String {
    format!("msg-{}", uuid::Uuid::new_v4())
}

/// Id under which the answer to `message_id` is emitted.
///
/// Deriving it from the inbound id means a message processed twice can never
/// produce two distinct responses.
pub fn response_id_for(message_id: &str) -> String {
    format!("{message_id}-response")
}

/// Event published by the UI when the user sends a chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    pub message: String,
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<CandidateSettings>,
}

impl InboundEvent {
    pub fn new(message_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            message_id: message_id.into(),
            settings: None,
        }
    }

    pub fn with_settings(mut self, settings: CandidateSettings) -> Self {
        self.settings = Some(settings);
        self
    }
}

/// A chat message produced by the agent.
///
/// Identity is `id`; once emitted with a given id the content never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub author: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<String>,
    pub is_thinking: bool,
    pub is_error: bool,
}

/// Event delivered to the UI transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEvent {
    pub content: String,
    pub message_id: String,
    /// ISO 8601 / RFC 3339, millisecond precision, UTC.
    pub timestamp: String,
    pub is_error: bool,
}

impl From<&Message> for OutboundEvent {
    fn from(message: &Message) -> Self {
        Self {
            content: message.content.clone(),
            message_id: message.id.clone(),
            timestamp: message
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            is_error: message.is_error,
        }
    }
}

/// Lifecycle state of one runtime instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuntimeState {
    Uninitialized,
    Initializing,
    Ready,
    ShuttingDown,
    Shutdown,
}

impl RuntimeState {
    fn rank(self) -> u8 {
        match self {
            RuntimeState::Uninitialized => 0,
            RuntimeState::Initializing => 1,
            RuntimeState::Ready => 2,
            RuntimeState::ShuttingDown => 3,
            RuntimeState::Shutdown => 4,
        }
    }

    /// Transitions only ever move forward.
    pub fn can_advance_to(self, next: RuntimeState) -> bool {
        next.rank() > self.rank()
    }

    pub fn is_terminal(self) -> bool {
        self == RuntimeState::Shutdown
    }
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuntimeState::Uninitialized => "uninitialized",
            RuntimeState::Initializing => "initializing",
            RuntimeState::Ready => "ready",
            RuntimeState::ShuttingDown => "shutting_down",
            RuntimeState::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

//! Conversation history kept by the request orchestrator.

use serde::{Deserialize, Serialize};

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn of a conversation, also the unit sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Append-only turn log with a persistence-time cap.
///
/// Appends never trim; `trim_to_cap` runs right before the history is persisted,
/// so a request in flight always sees the turns it was built from.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
    cap: usize,
}

impl ConversationHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            turns: Vec::new(),
            cap,
        }
    }

    /// Restore persisted turns, trimming anything beyond the cap.
    pub fn from_turns(turns: Vec<ConversationTurn>, cap: usize) -> Self {
        let mut history = Self { turns, cap };
        history.trim_to_cap();
        history
    }

    /// The last `k` turns, oldest first.
    pub fn recent(&self, k: usize) -> &[ConversationTurn] {
        let start = self.turns.len().saturating_sub(k);
        &self.turns[start..]
    }

    pub fn push_exchange(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.turns.push(ConversationTurn::user(user));
        self.turns.push(ConversationTurn::assistant(assistant));
    }

    /// Drop the oldest turns beyond the cap. Returns how many were removed.
    pub fn trim_to_cap(&mut self) -> usize {
        let excess = self.turns.len().saturating_sub(self.cap);
        if excess > 0 {
            self.turns.drain(..excess);
        }
        excess
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

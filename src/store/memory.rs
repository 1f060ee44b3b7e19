//! In-process store, used by tests and the `memory` storage backend.

use crate::error::StorageError;
use crate::history::ConversationTurn;
use crate::settings::ValidatedSettings;
use crate::store::ConversationStore;
use parking_lot::RwLock;

#[derive(Debug, Default)]
struct MemoryState {
    history: Vec<ConversationTurn>,
    conversation_id: Option<String>,
    settings: Option<ValidatedSettings>,
    history_writes: usize,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times history has been persisted.
    pub fn history_writes(&self) -> usize {
        self.state.read().history_writes
    }
}

impl ConversationStore for MemoryStore {
    fn load_history(&self) -> Result<Vec<ConversationTurn>, StorageError> {
        Ok(self.state.read().history.clone())
    }

    fn save_history(&self, turns: &[ConversationTurn]) -> Result<(), StorageError> {
        let mut state = self.state.write();
        state.history = turns.to_vec();
        state.history_writes += 1;
        Ok(())
    }

    fn conversation_id(&self) -> Result<Option<String>, StorageError> {
        Ok(self.state.read().conversation_id.clone())
    }

    fn set_conversation_id(&self, id: &str) -> Result<(), StorageError> {
        self.state.write().conversation_id = Some(id.to_string());
        Ok(())
    }

    fn load_settings(&self) -> Result<Option<ValidatedSettings>, StorageError> {
        Ok(self.state.read().settings.clone())
    }

    fn save_settings(&self, settings: &ValidatedSettings) -> Result<(), StorageError> {
        self.state.write().settings = Some(settings.clone());
        Ok(())
    }
}

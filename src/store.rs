//! Persisted agent state
//!
//! Simple get/set access to the conversation history, the conversation id and the
//! last validated settings. The runtime does not care where these live; `SledStore`
//! keeps them on disk, `MemoryStore` keeps them in process.

use crate::error::StorageError;
use crate::history::ConversationTurn;
use crate::settings::ValidatedSettings;

pub mod memory;
pub mod persistence;

pub use memory::MemoryStore;
pub use persistence::SledStore;

pub(crate) const HISTORY_KEY: &str = "conversation_history";
pub(crate) const CONVERSATION_ID_KEY: &str = "conversation_id";
pub(crate) const SETTINGS_KEY: &str = "validated_settings";

/// Get/set access to persisted agent state.
pub trait ConversationStore: Send + Sync {
    fn load_history(&self) -> Result<Vec<ConversationTurn>, StorageError>;

    fn save_history(&self, turns: &[ConversationTurn]) -> Result<(), StorageError>;

    fn conversation_id(&self) -> Result<Option<String>, StorageError>;

    fn set_conversation_id(&self, id: &str) -> Result<(), StorageError>;

    fn load_settings(&self) -> Result<Option<ValidatedSettings>, StorageError>;

    fn save_settings(&self, settings: &ValidatedSettings) -> Result<(), StorageError>;
}

/// Read the conversation id, creating and persisting a new one when absent.
pub fn ensure_conversation_id(store: &dyn ConversationStore) -> Result<String, StorageError> {
    if let Some(id) = store.conversation_id()? {
        return Ok(id);
    }
    rotate_conversation_id(store)
}

/// Start a new conversation id.
pub fn rotate_conversation_id(store: &dyn ConversationStore) -> Result<String, StorageError> {
    let id = format!("conv-{}", uuid::Uuid::new_v4());
    store.set_conversation_id(&id)?;
    Ok(id)
}

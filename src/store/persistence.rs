//! Sled-backed persistence for agent state

use crate::error::StorageError;
use crate::history::ConversationTurn;
use crate::settings::ValidatedSettings;
use crate::store::{ConversationStore, CONVERSATION_ID_KEY, HISTORY_KEY, SETTINGS_KEY};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Sled-based implementation of ConversationStore
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Open (or create) a store at the given directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Get the underlying sled database (for advanced operations)
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.db.get(key.as_bytes())? {
            Some(value) => {
                let decoded = bincode::deserialize(&value).map_err(|e| StorageError::Decode {
                    key: key.to_string(),
                    message: e.to_string(),
                })?;
                Ok(Some(decoded))
            }
            None => Ok(None),
        }
    }

    fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let encoded = bincode::serialize(value).map_err(|e| StorageError::Encode {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.db.insert(key.as_bytes(), encoded)?;
        Ok(())
    }
}

impl ConversationStore for SledStore {
    fn load_history(&self) -> Result<Vec<ConversationTurn>, StorageError> {
        Ok(self.get(HISTORY_KEY)?.unwrap_or_default())
    }

    fn save_history(&self, turns: &[ConversationTurn]) -> Result<(), StorageError> {
        self.put(HISTORY_KEY, turns)?;
        self.flush()
    }

    fn conversation_id(&self) -> Result<Option<String>, StorageError> {
        self.get(CONVERSATION_ID_KEY)
    }

    fn set_conversation_id(&self, id: &str) -> Result<(), StorageError> {
        self.put(CONVERSATION_ID_KEY, id)
    }

    fn load_settings(&self) -> Result<Option<ValidatedSettings>, StorageError> {
        self.get(SETTINGS_KEY)
    }

    fn save_settings(&self, settings: &ValidatedSettings) -> Result<(), StorageError> {
        self.put(SETTINGS_KEY, settings)
    }
}

use async_trait::async_trait;
use std::collections::HashMap;

use super::{SettingsStore, StoredSettings};
use crate::error::StorageError;
use crate::settings::{ChatId, Settings};

/// Settings kept in a map for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: HashMap<ChatId, StoredSettings>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with records captured elsewhere.
    pub fn with_records(records: impl IntoIterator<Item = (ChatId, StoredSettings)>) -> Self {
        Self {
            records: records.into_iter().collect(),
        }
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get(&mut self, id: ChatId) -> Result<StoredSettings, StorageError> {
        self.records.get(&id).cloned().ok_or(StorageError::NotFound(id))
    }

    async fn store(&mut self, id: ChatId, record: StoredSettings) -> Result<(), StorageError> {
        self.records.insert(id, record);
        Ok(())
    }

    async fn delete(&mut self, id: ChatId) -> Result<(), StorageError> {
        self.records.remove(&id);
        Ok(())
    }

    async fn get_all_active(&mut self) -> Result<Vec<(ChatId, Settings)>, StorageError> {
        let mut active: Vec<_> = self
            .records
            .iter()
            .filter(|(_, record)| record.active)
            .map(|(id, record)| (*id, record.settings.clone()))
            .collect();
        active.sort_by_key(|(id, _)| *id);
        Ok(active)
    }
}

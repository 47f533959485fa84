use anyhow::Context;
use async_trait::async_trait;
use directories::ProjectDirs;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{SettingsStore, StoredSettings};
use crate::error::StorageError;
use crate::settings::{ChatId, Settings};

/// All records in one JSON document keyed by chat id.
///
/// Records are kept undecoded so one bad entry does not hide the others.
pub struct JsonFileStore {
    path: PathBuf,
    records: BTreeMap<ChatId, serde_json::Value>,
}

impl JsonFileStore {
    /// `<data dir>/sessions.json`, creating the data directory if needed.
    pub fn default_path() -> anyhow::Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "tempo", "tempo")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory at {:?}", data_dir))?;

        Ok(data_dir.join("sessions.json"))
    }

    /// Open the document at `path`. A missing file is an empty store.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), records = records.len(), "Opened settings file");
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the whole document through a temporary file and a rename.
    async fn flush(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_vec_pretty(&self.records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for JsonFileStore {
    async fn get(&mut self, id: ChatId) -> Result<StoredSettings, StorageError> {
        let value = self.records.get(&id).ok_or(StorageError::NotFound(id))?;
        Ok(decode(value)?)
    }

    async fn store(&mut self, id: ChatId, record: StoredSettings) -> Result<(), StorageError> {
        self.records.insert(id, serde_json::to_value(&record)?);
        self.flush().await
    }

    async fn delete(&mut self, id: ChatId) -> Result<(), StorageError> {
        if self.records.remove(&id).is_some() {
            self.flush().await?;
        }
        Ok(())
    }

    async fn get_all_active(&mut self) -> Result<Vec<(ChatId, Settings)>, StorageError> {
        let mut active = Vec::new();
        for (id, value) in &self.records {
            match decode(value) {
                Ok(record) if record.active => active.push((*id, record.settings)),
                Ok(_) => {}
                Err(e) => warn!(chat = %id, "Skipping malformed settings record: {}", e),
            }
        }
        Ok(active)
    }
}

fn decode(value: &serde_json::Value) -> Result<StoredSettings, serde_json::Error> {
    StoredSettings::deserialize(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionTemplate, SprintCount};
    use chrono::Utc;
    use tempfile::tempdir;

    fn running_record() -> StoredSettings {
        let template = SessionTemplate::new(SprintCount::new(3), 900, 120);
        let mut session = template.instantiate();
        session.start(Utc::now()).unwrap();
        let settings = Settings {
            default_session: template,
            running: Some(session),
            ..Settings::default()
        };
        StoredSettings::capture(settings, Utc::now())
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("sessions.json");
        let record = running_record();

        let mut store = JsonFileStore::open(&path).await.unwrap();
        store.store(ChatId(42), record.clone()).await.unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let mut reopened = JsonFileStore::open(&path).await.unwrap();
        assert_eq!(reopened.get(ChatId(42)).await.unwrap(), record);
        assert_eq!(reopened.get_all_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_record_is_skipped_when_restoring() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        let good = serde_json::to_value(running_record()).unwrap();
        let doc = serde_json::json!({
            "1": good,
            "2": { "running": "not a session", "active": true },
        });
        std::fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let mut store = JsonFileStore::open(&path).await.unwrap();
        let active = store.get_all_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].0, ChatId(1));

        assert!(matches!(
            store.get(ChatId(2)).await,
            Err(StorageError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn delete_rewrites_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        let mut store = JsonFileStore::open(&path).await.unwrap();
        store.store(ChatId(1), running_record()).await.unwrap();
        store.delete(ChatId(1)).await.unwrap();

        let mut reopened = JsonFileStore::open(&path).await.unwrap();
        assert!(matches!(
            reopened.get(ChatId(1)).await,
            Err(StorageError::NotFound(ChatId(1)))
        ));
    }

    #[tokio::test]
    async fn missing_file_is_empty_store() {
        let dir = tempdir().unwrap();
        let mut store = JsonFileStore::open(dir.path().join("absent.json")).await.unwrap();
        assert!(store.get_all_active().await.unwrap().is_empty());
    }
}

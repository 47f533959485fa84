//! Persistence actor
//!
//! A single task owns the storage backend and serves requests one at a time,
//! in the order they were submitted. Callers talk to it through a cloneable
//! [`PersistenceHandle`]; every request carries its own reply channel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::settings::{ChatId, Settings};

pub mod json_store;
pub mod memory;

pub use json_store::JsonFileStore;
pub use memory::MemoryStore;

const REQUEST_QUEUE_CAPACITY: usize = 64;

/// A settings record as written to storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSettings {
    #[serde(flatten)]
    pub settings: Settings,
    /// The running session classified exactly `Running` when written.
    #[serde(default)]
    pub active: bool,
}

impl StoredSettings {
    pub fn capture(settings: Settings, now: DateTime<Utc>) -> Self {
        let active = settings
            .running
            .as_ref()
            .is_some_and(|session| session.is_running_at(now));
        Self { settings, active }
    }
}

/// Storage backend driven by the persistence actor.
#[async_trait]
pub trait SettingsStore: Send + 'static {
    async fn get(&mut self, id: ChatId) -> Result<StoredSettings, StorageError>;

    async fn store(&mut self, id: ChatId, record: StoredSettings) -> Result<(), StorageError>;

    async fn delete(&mut self, id: ChatId) -> Result<(), StorageError>;

    /// Every record flagged active. Undecodable records are skipped.
    async fn get_all_active(&mut self) -> Result<Vec<(ChatId, Settings)>, StorageError>;
}

type Reply<T> = oneshot::Sender<Result<T, StorageError>>;

enum Request {
    Get {
        id: ChatId,
        reply: Reply<Settings>,
    },
    Store {
        id: ChatId,
        settings: Settings,
        revision: Option<u64>,
        reply: Reply<()>,
    },
    Delete {
        id: ChatId,
        revision: Option<u64>,
        reply: Reply<()>,
    },
    GetAllActive {
        reply: Reply<Vec<(ChatId, Settings)>>,
    },
}

/// Cloneable front end of the persistence actor.
#[derive(Clone)]
pub struct PersistenceHandle {
    requests: mpsc::Sender<Request>,
}

impl PersistenceHandle {
    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> Request) -> Result<T, StorageError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(build(reply))
            .await
            .map_err(|_| StorageError::ActorGone)?;
        response.await.map_err(|_| StorageError::ActorGone)?
    }

    pub async fn get(&self, id: ChatId) -> Result<Settings, StorageError> {
        self.call(|reply| Request::Get { id, reply }).await
    }

    pub async fn store(&self, id: ChatId, settings: Settings) -> Result<(), StorageError> {
        self.call(|reply| Request::Store {
            id,
            settings,
            revision: None,
            reply,
        })
        .await
    }

    /// Store unless a newer revision of the same record was already written.
    pub(crate) async fn store_revision(
        &self,
        id: ChatId,
        settings: Settings,
        revision: u64,
    ) -> Result<(), StorageError> {
        self.call(|reply| Request::Store {
            id,
            settings,
            revision: Some(revision),
            reply,
        })
        .await
    }

    pub async fn delete(&self, id: ChatId) -> Result<(), StorageError> {
        self.call(|reply| Request::Delete {
            id,
            revision: None,
            reply,
        })
        .await
    }

    pub(crate) async fn delete_revision(&self, id: ChatId, revision: u64) -> Result<(), StorageError> {
        self.call(|reply| Request::Delete {
            id,
            revision: Some(revision),
            reply,
        })
        .await
    }

    pub async fn get_all_active(&self) -> Result<Vec<(ChatId, Settings)>, StorageError> {
        self.call(|reply| Request::GetAllActive { reply }).await
    }
}

/// Single consumer of the request queue.
pub struct PersistenceActor<S> {
    store: S,
    requests: mpsc::Receiver<Request>,
    /// Highest revision written or deleted per record.
    revisions: HashMap<ChatId, u64>,
}

impl<S: SettingsStore> PersistenceActor<S> {
    /// Spawn the actor on the current runtime.
    ///
    /// The actor stops once every handle has been dropped.
    pub fn spawn(store: S) -> (PersistenceHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let actor = Self {
            store,
            requests: rx,
            revisions: HashMap::new(),
        };
        let task = tokio::spawn(actor.run());
        (PersistenceHandle { requests: tx }, task)
    }

    async fn run(mut self) {
        info!("Persistence actor started");
        while let Some(request) = self.requests.recv().await {
            self.handle(request).await;
        }
        info!("Persistence actor stopped");
    }

    /// Whether `revision` is older than what was already applied to `id`.
    fn is_stale(&mut self, id: ChatId, revision: Option<u64>) -> bool {
        let Some(revision) = revision else {
            return false;
        };
        match self.revisions.get(&id) {
            Some(&seen) if seen > revision => true,
            _ => {
                self.revisions.insert(id, revision);
                false
            }
        }
    }

    async fn handle(&mut self, request: Request) {
        match request {
            Request::Get { id, reply } => {
                let result = self.store.get(id).await.map(|record| record.settings);
                let _ = reply.send(result);
            }
            Request::Store {
                id,
                settings,
                revision,
                reply,
            } => {
                let result = if id.is_zero() {
                    Ok(())
                } else if self.is_stale(id, revision) {
                    debug!(chat = %id, ?revision, "Dropping stale write");
                    Ok(())
                } else {
                    let record = StoredSettings::capture(settings, Utc::now());
                    self.store.store(id, record).await
                };
                if let Err(e) = &result {
                    warn!(chat = %id, "Failed to store settings: {}", e);
                }
                let _ = reply.send(result);
            }
            Request::Delete { id, revision, reply } => {
                let result = if self.is_stale(id, revision) {
                    Ok(())
                } else {
                    self.store.delete(id).await
                };
                let _ = reply.send(result);
            }
            Request::GetAllActive { reply } => {
                let _ = reply.send(self.store.get_all_active().await);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionTemplate, SprintCount};

    fn running_settings(now: DateTime<Utc>) -> Settings {
        let template = SessionTemplate::new(SprintCount::new(2), 600, 60);
        let mut session = template.instantiate();
        session.start(now).unwrap();
        Settings {
            default_session: template,
            running: Some(session),
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn store_then_get_round_trips() {
        let (handle, _task) = PersistenceActor::spawn(MemoryStore::new());
        let settings = running_settings(Utc::now());

        handle.store(ChatId(7), settings.clone()).await.unwrap();
        assert_eq!(handle.get(ChatId(7)).await.unwrap(), settings);
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let (handle, _task) = PersistenceActor::spawn(MemoryStore::new());
        assert!(matches!(
            handle.get(ChatId(1)).await,
            Err(StorageError::NotFound(ChatId(1)))
        ));
    }

    #[tokio::test]
    async fn zero_id_is_never_stored() {
        let (handle, _task) = PersistenceActor::spawn(MemoryStore::new());
        handle.store(ChatId(0), Settings::default()).await.unwrap();
        assert!(handle.get(ChatId(0)).await.is_err());
    }

    #[tokio::test]
    async fn only_running_sessions_are_active() {
        let (handle, _task) = PersistenceActor::spawn(MemoryStore::new());
        let now = Utc::now();

        handle.store(ChatId(1), running_settings(now)).await.unwrap();

        let mut paused = running_settings(now);
        if let Some(session) = paused.running.as_mut() {
            session.pause(now).unwrap();
        }
        handle.store(ChatId(2), paused).await.unwrap();
        handle.store(ChatId(3), Settings::default()).await.unwrap();

        let active = handle.get_all_active().await.unwrap();
        let ids: Vec<_> = active.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![ChatId(1)]);
    }

    #[tokio::test]
    async fn delete_after_concurrent_writes_removes_record() {
        let (handle, _task) = PersistenceActor::spawn(MemoryStore::new());

        let mut writes = Vec::new();
        for autorun in [false, true, false, true] {
            let handle = handle.clone();
            let settings = Settings {
                autorun,
                ..Settings::default()
            };
            writes.push(tokio::spawn(async move { handle.store(ChatId(5), settings).await }));
            tokio::task::yield_now().await;
        }
        for write in writes {
            write.await.unwrap().unwrap();
        }
        handle.delete(ChatId(5)).await.unwrap();
        assert!(handle.get(ChatId(5)).await.is_err());
    }

    #[tokio::test]
    async fn stale_revisions_are_dropped() {
        let (handle, _task) = PersistenceActor::spawn(MemoryStore::new());
        let newer = Settings {
            autorun: false,
            ..Settings::default()
        };

        handle.store_revision(ChatId(9), newer.clone(), 4).await.unwrap();
        handle.store_revision(ChatId(9), Settings::default(), 3).await.unwrap();

        assert_eq!(handle.get(ChatId(9)).await.unwrap(), newer);
    }

    #[tokio::test]
    async fn handle_reports_stopped_actor() {
        let (handle, task) = PersistenceActor::spawn(MemoryStore::new());
        task.abort();
        let _ = task.await;
        assert!(matches!(
            handle.get(ChatId(1)).await,
            Err(StorageError::ActorGone)
        ));
    }
}

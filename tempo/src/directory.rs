//! Session directory
//!
//! The authoritative in-memory cache of per-conversation settings. The lock is
//! a synchronous `parking_lot::RwLock` and is never held across an `.await`
//! or a lifecycle callback.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::error::{Result, StorageError};
use crate::persistence::PersistenceHandle;
use crate::session::Session;
use crate::settings::{ChatId, Settings};
use crate::timer::TimerSlot;

/// One conversation as seen by the engine.
#[derive(Default)]
pub(crate) struct ChatEntry {
    pub(crate) settings: Settings,
    /// Epoch of the timer that last owned `settings.running`.
    pub(crate) epoch: u64,
    revision: u64,
    pub(crate) timer: Option<TimerSlot>,
}

impl ChatEntry {
    fn new(settings: Settings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Hand `session` over to the timer behind `slot`.
    pub(crate) fn attach(&mut self, slot: TimerSlot, session: Session) {
        self.epoch = slot.epoch;
        self.settings.running = Some(session);
        self.timer = Some(slot);
    }
}

pub struct Directory {
    entries: RwLock<HashMap<ChatId, ChatEntry>>,
    persistence: Option<PersistenceHandle>,
    epochs: AtomicU64,
    revisions: AtomicU64,
}

impl Directory {
    /// Without a persistence handle the directory runs memory-only.
    pub fn new(persistence: Option<PersistenceHandle>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            persistence,
            epochs: AtomicU64::new(0),
            revisions: AtomicU64::new(0),
        }
    }

    pub fn persistence(&self) -> Option<&PersistenceHandle> {
        self.persistence.as_ref()
    }

    pub(crate) fn next_epoch(&self) -> u64 {
        self.epochs.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Only called with the entries write guard held, so revision order
    /// matches the order in which entries change.
    fn next_revision(&self) -> u64 {
        self.revisions.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn contains(&self, id: ChatId) -> bool {
        self.entries.read().contains_key(&id)
    }

    /// Make sure `id` has an entry, loading it from storage on a miss.
    pub async fn ensure_loaded(&self, id: ChatId) -> Result<()> {
        if self.contains(id) {
            return Ok(());
        }

        let settings = match &self.persistence {
            None => Settings::default(),
            Some(persistence) => match persistence.get(id).await {
                Ok(settings) => settings,
                Err(StorageError::NotFound(_)) => Settings::default(),
                Err(StorageError::Serialization(e)) => {
                    warn!(chat = %id, "Stored settings are unreadable, starting over: {}", e);
                    Settings::default()
                }
                Err(e) => return Err(e.into()),
            },
        };

        // Another caller may have loaded the entry while we were waiting.
        self.entries.write().entry(id).or_insert_with(|| ChatEntry {
            revision: self.next_revision(),
            ..ChatEntry::new(settings)
        });
        debug!(chat = %id, "Loaded settings into directory");
        Ok(())
    }

    /// Read access to one entry.
    pub(crate) fn read<R>(&self, id: ChatId, f: impl FnOnce(&ChatEntry) -> R) -> Option<R> {
        self.entries.read().get(&id).map(f)
    }

    /// Mutate one entry, creating a default one if it is missing.
    pub(crate) fn update<R>(&self, id: ChatId, f: impl FnOnce(&mut ChatEntry) -> R) -> R {
        let mut entries = self.entries.write();
        let entry = entries.entry(id).or_default();
        entry.revision = self.next_revision();
        f(entry)
    }

    /// Snapshot of the settings for `id`.
    pub fn settings(&self, id: ChatId) -> Option<Settings> {
        self.read(id, |entry| entry.settings.clone())
    }

    /// Replace the entry for `id`, dropping any attached timer slot.
    pub(crate) fn preload(&self, id: ChatId, settings: Settings) {
        let mut entries = self.entries.write();
        let mut entry = ChatEntry::new(settings);
        entry.revision = self.next_revision();
        entries.insert(id, entry);
    }

    /// Write back a timer's session if that timer still owns the entry.
    ///
    /// With `release` the timer slot is detached as well. Returns `false`
    /// when the timer was superseded or the conversation was reset.
    pub(crate) fn publish(&self, id: ChatId, epoch: u64, session: &Session, release: bool) -> bool {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(&id) else {
            return false;
        };
        if entry.epoch != epoch {
            return false;
        }
        entry.settings.running = Some(session.clone());
        entry.revision = self.next_revision();
        if release {
            entry.timer = None;
        }
        true
    }

    /// Drop a slot whose timer went away without releasing it.
    pub(crate) fn clear_slot(&self, id: ChatId, epoch: u64) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&id) {
            if entry.timer.as_ref().is_some_and(|slot| slot.epoch == epoch) {
                warn!(chat = %id, epoch, "Clearing timer slot left behind by a dead timer");
                entry.timer = None;
            }
        }
    }

    /// Best-effort write of the current entry to storage.
    pub async fn persist(&self, id: ChatId) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        let Some((settings, revision)) =
            self.read(id, |entry| (entry.settings.clone(), entry.revision))
        else {
            return;
        };
        if let Err(e) = persistence.store_revision(id, settings, revision).await {
            warn!(chat = %id, "Write-back failed: {}", e);
        }
    }

    /// Remove the conversation from memory and storage.
    ///
    /// Dropping the entry drops its timer slot, which disconnects the
    /// running timer's command queue.
    pub async fn forget(&self, id: ChatId) -> Result<()> {
        let revision = {
            let mut entries = self.entries.write();
            entries.remove(&id);
            self.next_revision()
        };
        if let Some(persistence) = &self.persistence {
            persistence.delete_revision(id, revision).await?;
        }
        Ok(())
    }
}

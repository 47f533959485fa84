//! Engine facade
//!
//! Entry points used by the command dispatch surface. Every operation
//! validates before it mutates, so a refused command leaves the session as it
//! was.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tempo_ipc::{SessionState, SessionStatus};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::TimerConfig;
use crate::directory::{ChatEntry, Directory};
use crate::error::{EngineError, Result};
use crate::persistence::PersistenceHandle;
use crate::session::{Session, SessionTemplate};
use crate::settings::{ChatId, Settings};
use crate::timer::{
    self, Command, EndKind, SessionHooks, SessionTimer, TimerEnds, TimerSlot,
    DEFAULT_POLL_INTERVAL, DEFAULT_QUEUE_CAPACITY,
};

/// Outcome of handing a command to a conversation.
enum Delivery<T> {
    /// The live timer will apply it.
    Queued,
    /// No timer was alive; the fallback ran under the directory lock.
    Local(T),
}

enum Step<T> {
    Done(Result<Delivery<T>>),
    Send(mpsc::Sender<Command>),
    Wait(u64, watch::Receiver<bool>),
}

pub struct Engine {
    directory: Arc<Directory>,
    poll_interval: Duration,
    queue_capacity: usize,
}

impl Engine {
    /// Engine with the default timing. `None` runs memory-only.
    pub fn new(persistence: Option<PersistenceHandle>) -> Self {
        Self {
            directory: Arc::new(Directory::new(persistence)),
            poll_interval: DEFAULT_POLL_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn with_timer_config(mut self, config: &TimerConfig) -> Self {
        self.poll_interval = config.poll_interval();
        self.queue_capacity = config.queue_capacity.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    fn timer_channel(&self) -> (TimerSlot, TimerEnds) {
        timer::channel(self.directory.next_epoch(), self.queue_capacity)
    }

    fn spawn_timer(&self, id: ChatId, session: Session, ends: TimerEnds, hooks: Arc<dyn SessionHooks>) {
        SessionTimer::new(
            id,
            session,
            ends,
            Arc::clone(&self.directory),
            hooks,
            self.poll_interval,
        )
        .spawn();
    }

    /// Start a new cycle from the conversation's default template.
    pub async fn start(&self, id: ChatId, hooks: Arc<dyn SessionHooks>) -> Result<SessionStatus> {
        self.directory.ensure_loaded(id).await?;

        let now = Utc::now();
        let (slot, ends) = self.timer_channel();
        let session = self.directory.update(id, |entry| {
            if entry.timer.is_some() {
                return Err(EngineError::AlreadyRunning);
            }
            if let Some(current) = &entry.settings.running {
                if !current.is_stopped_at(now) {
                    return Err(EngineError::AlreadyRunning);
                }
            }

            let mut session = entry.settings.default_session.instantiate();
            session.start(now)?;
            entry.attach(slot, session.clone());
            Ok(session)
        })?;

        info!(chat = %id, "Session started");
        let status = session.status_at(now);
        self.spawn_timer(id, session, ends, hooks);
        Ok(status)
    }

    /// Continue a stopped session with a fresh timer.
    pub async fn resume(&self, id: ChatId, hooks: Arc<dyn SessionHooks>) -> Result<SessionStatus> {
        self.directory.ensure_loaded(id).await?;

        let now = Utc::now();
        let (slot, ends) = self.timer_channel();
        let session = self.directory.update(id, |entry| {
            if entry.timer.is_some() {
                return Err(EngineError::AlreadyRunning);
            }
            let mut session = entry
                .settings
                .running
                .clone()
                .ok_or(EngineError::UninitializedSession)?;
            session.resume(now)?;
            entry.attach(slot, session.clone());
            Ok(session)
        })?;

        info!(chat = %id, "Session resumed");
        let status = session.status_at(now);
        self.spawn_timer(id, session, ends, hooks);
        Ok(status)
    }

    /// Ask the running timer to pause.
    pub async fn pause(&self, id: ChatId) -> Result<()> {
        self.directory.ensure_loaded(id).await?;

        self.deliver(
            id,
            Command::Pause,
            |slot| {
                if slot.pause_requested {
                    return Err(EngineError::AlreadyPaused);
                }
                if slot.cancel_requested {
                    return Err(EngineError::SessionNotRunning);
                }
                slot.pause_requested = true;
                Ok(())
            },
            |entry| match &entry.settings.running {
                Some(session) if session.state_at(Utc::now()) == SessionState::Paused => {
                    Err(EngineError::AlreadyPaused)
                }
                _ => Err(EngineError::SessionNotRunning),
            },
        )
        .await
        .map(|_: Delivery<()>| ())
    }

    /// Cancel the session, through its timer when one is alive.
    pub async fn cancel(&self, id: ChatId, hooks: Arc<dyn SessionHooks>) -> Result<()> {
        self.directory.ensure_loaded(id).await?;

        let delivery = self
            .deliver(
                id,
                Command::Cancel,
                |slot| {
                    if slot.cancel_requested {
                        return Err(EngineError::AlreadyCanceled);
                    }
                    slot.cancel_requested = true;
                    Ok(())
                },
                |entry| {
                    let session = entry
                        .settings
                        .running
                        .as_mut()
                        .ok_or(EngineError::SessionNotRunning)?;
                    if session.is_finished() {
                        return Err(EngineError::SessionNotRunning);
                    }
                    session.cancel(Utc::now())?;
                    Ok(session.clone())
                },
            )
            .await?;

        if let Delivery::Local(session) = delivery {
            info!(chat = %id, "Canceled session without a running timer");
            hooks.on_session_end(id, &session, EndKind::Canceled);
            self.directory.persist(id).await;
        }
        Ok(())
    }

    /// Send `command` to the live timer or run `local` when there is none.
    ///
    /// `mark` validates and records the request on the slot. Both closures
    /// run under the directory write lock.
    async fn deliver<T>(
        &self,
        id: ChatId,
        command: Command,
        mut mark: impl FnMut(&mut TimerSlot) -> Result<()>,
        mut local: impl FnMut(&mut ChatEntry) -> Result<T>,
    ) -> Result<Delivery<T>> {
        loop {
            let step = self.directory.update(id, |entry| {
                if let Some(slot) = entry.timer.as_mut() {
                    if slot.queue.is_closed() {
                        return Step::Wait(slot.epoch, slot.released.clone());
                    }
                    if let Err(e) = mark(slot) {
                        return Step::Done(Err(e));
                    }
                    return match slot.queue.try_send(command) {
                        Ok(()) => Step::Done(Ok(Delivery::Queued)),
                        Err(TrySendError::Full(_)) => Step::Send(slot.queue.clone()),
                        Err(TrySendError::Closed(_)) => {
                            Step::Wait(slot.epoch, slot.released.clone())
                        }
                    };
                }
                Step::Done(local(entry).map(Delivery::Local))
            });

            match step {
                Step::Done(result) => return result,
                Step::Send(queue) => {
                    debug!(chat = %id, ?command, "Command queue full, waiting for room");
                    if queue.send(command).await.is_ok() {
                        return Ok(Delivery::Queued);
                    }
                }
                Step::Wait(epoch, mut released) => {
                    // The timer is stopping; retry once it has written back.
                    if released.wait_for(|done| *done).await.is_err() {
                        self.directory.clear_slot(id, epoch);
                    }
                }
            }
        }
    }

    /// Validate and store a new default template.
    ///
    /// Returns the autorun flag so the caller can start the cycle right away.
    pub async fn configure(&self, id: ChatId, template: SessionTemplate) -> Result<bool> {
        let template = template.validate()?;
        self.directory.ensure_loaded(id).await?;

        let autorun = self.directory.update(id, |entry| {
            entry.settings.default_session = template;
            entry.settings.autorun
        });
        self.directory.persist(id).await;
        info!(chat = %id, %template, "Session configured");
        Ok(autorun)
    }

    /// Store the classic four sprint template.
    pub async fn use_classic(&self, id: ChatId) -> Result<()> {
        self.configure(id, SessionTemplate::classic()).await.map(|_| ())
    }

    pub async fn set_autorun(&self, id: ChatId, enabled: bool) -> Result<()> {
        self.directory.ensure_loaded(id).await?;
        self.directory
            .update(id, |entry| entry.settings.autorun = enabled);
        self.directory.persist(id).await;
        Ok(())
    }

    pub async fn settings(&self, id: ChatId) -> Result<Settings> {
        self.directory.ensure_loaded(id).await?;
        Ok(self.directory.settings(id).unwrap_or_default())
    }

    /// The running session, or a pending preview of the default template.
    pub async fn status(&self, id: ChatId) -> Result<SessionStatus> {
        let settings = self.settings(id).await?;
        let now = Utc::now();
        match settings.running {
            Some(session) => Ok(session.status_at(now)),
            None if settings.default_session.is_zero() => Err(EngineError::UninitializedSession),
            None => Ok(settings.default_session.instantiate().status_at(now)),
        }
    }

    /// Forget the conversation. A running timer sees its queue disconnect.
    pub async fn reset(&self, id: ChatId) -> Result<()> {
        self.directory.forget(id).await?;
        info!(chat = %id, "Conversation reset");
        Ok(())
    }

    /// Respawn timers for every session stored as running.
    ///
    /// Returns how many timers were started.
    pub async fn restore(&self, hooks: Arc<dyn SessionHooks>) -> Result<usize> {
        let Some(persistence) = self.directory.persistence() else {
            return Ok(0);
        };
        let active = persistence.get_all_active().await?;

        let mut restored = 0;
        for (id, settings) in active {
            let Some(session) = settings.running.clone() else {
                warn!(chat = %id, "Active record without a running session");
                continue;
            };
            let (slot, ends) = self.timer_channel();
            self.directory.preload(id, settings);
            self.directory
                .update(id, |entry| entry.attach(slot, session.clone()));
            self.spawn_timer(id, session, ends, Arc::clone(&hooks));
            restored += 1;
        }

        info!(restored, "Restored running sessions");
        Ok(restored)
    }
}

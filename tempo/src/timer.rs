//! Session timer task
//!
//! One task per running session. The task owns the session outright: it
//! polls the absolute deadlines, turns elapsed deadlines into internal
//! commands, applies every command in queue order, fires exactly one
//! lifecycle callback per transition and writes the result back.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::directory::Directory;
use crate::session::Session;
use crate::settings::ChatId;

/// Default timer poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Default bound of the per-session command queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Messages delivered to a running session timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pause,
    Cancel,
    RestStarted,
    RestFinished,
    Finished,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndKind {
    Finished,
    Canceled,
}

/// Lifecycle callbacks, invoked synchronously from the timer task.
///
/// Implementations must not block; hand slow work to another task.
pub trait SessionHooks: Send + Sync {
    fn on_rest_begin(&self, chat: ChatId, session: &Session);

    fn on_rest_finish(&self, chat: ChatId, session: &Session);

    fn on_session_end(&self, chat: ChatId, session: &Session, kind: EndKind);

    fn on_session_pause(&self, chat: ChatId, session: &Session);
}

/// The directory's view of a live timer.
pub(crate) struct TimerSlot {
    pub(crate) epoch: u64,
    pub(crate) queue: mpsc::Sender<Command>,
    /// Flips to `true` once the timer has written back its final state.
    pub(crate) released: watch::Receiver<bool>,
    pub(crate) pause_requested: bool,
    pub(crate) cancel_requested: bool,
}

/// The timer's side of a [`TimerSlot`].
pub(crate) struct TimerEnds {
    epoch: u64,
    queue: mpsc::Receiver<Command>,
    internal: mpsc::WeakSender<Command>,
    released: watch::Sender<bool>,
}

/// A fresh command queue split into the directory half and the timer half.
///
/// Only the slot holds a strong sender, so dropping the slot disconnects the
/// queue.
pub(crate) fn channel(epoch: u64, capacity: usize) -> (TimerSlot, TimerEnds) {
    let (tx, rx) = mpsc::channel(capacity);
    let (released_tx, released_rx) = watch::channel(false);
    let ends = TimerEnds {
        epoch,
        queue: rx,
        internal: tx.downgrade(),
        released: released_tx,
    };
    let slot = TimerSlot {
        epoch,
        queue: tx,
        released: released_rx,
        pause_requested: false,
        cancel_requested: false,
    };
    (slot, ends)
}

enum Flow {
    Changed,
    Unchanged,
    Exit,
}

pub(crate) struct SessionTimer {
    chat: ChatId,
    session: Session,
    ends: TimerEnds,
    directory: Arc<Directory>,
    hooks: Arc<dyn SessionHooks>,
    poll_interval: Duration,
}

impl SessionTimer {
    pub(crate) fn new(
        chat: ChatId,
        session: Session,
        ends: TimerEnds,
        directory: Arc<Directory>,
        hooks: Arc<dyn SessionHooks>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            chat,
            session,
            ends,
            directory,
            hooks,
            poll_interval,
        }
    }

    pub(crate) fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!(chat = %self.chat, epoch = self.ends.epoch, "Session timer started");
        self.directory.persist(self.chat).await;

        loop {
            let command = match self.ends.queue.try_recv() {
                Ok(command) => command,
                Err(TryRecvError::Empty) => {
                    tokio::time::sleep(self.poll_interval).await;
                    self.detect_deadlines(Utc::now());
                    continue;
                }
                Err(TryRecvError::Disconnected) => {
                    warn!(chat = %self.chat, "Command queue disconnected, stopping timer");
                    let _ = self.ends.released.send(true);
                    return;
                }
            };

            match self.apply(command, Utc::now()) {
                Flow::Changed => {
                    if !self.directory.publish(self.chat, self.ends.epoch, &self.session, false) {
                        info!(chat = %self.chat, "Session timer superseded, stopping");
                        let _ = self.ends.released.send(true);
                        return;
                    }
                    self.directory.persist(self.chat).await;
                }
                Flow::Unchanged => {}
                Flow::Exit => {
                    self.shutdown().await;
                    return;
                }
            }
        }
    }

    /// Queue the internal command for an elapsed deadline, if any.
    fn detect_deadlines(&self, now: DateTime<Utc>) {
        let command = if self.session.sprint_deadline_passed(now) {
            if self.session.is_last_sprint() {
                Command::Finished
            } else {
                Command::RestStarted
            }
        } else if self.session.rest_deadline_passed(now) {
            Command::RestFinished
        } else {
            return;
        };

        // A failed upgrade means the queue is gone; the next receive reports it.
        let Some(sender) = self.ends.internal.upgrade() else {
            return;
        };
        match sender.try_send(command) {
            Ok(()) => debug!(chat = %self.chat, ?command, "Deadline passed"),
            Err(TrySendError::Full(_)) => {
                debug!(chat = %self.chat, ?command, "Command queue full, retrying on next poll")
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    fn apply(&mut self, command: Command, now: DateTime<Utc>) -> Flow {
        let chat = self.chat;
        match command {
            Command::Pause => match self.session.pause(now) {
                Ok(()) => {
                    info!(%chat, "Session paused");
                    self.hooks.on_session_pause(chat, &self.session);
                    Flow::Exit
                }
                Err(e) => {
                    debug!(%chat, "Ignoring pause: {}", e);
                    Flow::Unchanged
                }
            },
            Command::Cancel => match self.session.cancel(now) {
                Ok(()) => {
                    info!(%chat, "Session canceled");
                    self.hooks.on_session_end(chat, &self.session, EndKind::Canceled);
                    Flow::Exit
                }
                Err(e) => {
                    debug!(%chat, "Ignoring cancel: {}", e);
                    Flow::Unchanged
                }
            },
            Command::RestStarted if !self.session.is_rest() => {
                self.session.rest_started(now);
                info!(%chat, "Rest started");
                self.hooks.on_rest_begin(chat, &self.session);
                Flow::Changed
            }
            Command::RestFinished if self.session.is_rest() => {
                self.session.rest_finished(now);
                info!(%chat, "Rest finished");
                self.hooks.on_rest_finish(chat, &self.session);
                Flow::Changed
            }
            Command::Finished if !self.session.is_rest() => {
                self.session.finish(now);
                info!(%chat, "Session finished");
                self.hooks.on_session_end(chat, &self.session, EndKind::Finished);
                Flow::Exit
            }
            stale => {
                debug!(%chat, command = ?stale, "Ignoring command for the other phase");
                Flow::Unchanged
            }
        }
    }

    /// Close the queue, honour a late cancel, then write back and detach.
    async fn shutdown(mut self) {
        self.ends.queue.close();

        // `recv` also waits for senders that reserved room before the close.
        let now = Utc::now();
        while let Some(command) = self.ends.queue.recv().await {
            match command {
                Command::Cancel if !self.session.is_canceled() && !self.session.is_finished() => {
                    if self.session.cancel(now).is_ok() {
                        info!(chat = %self.chat, "Session canceled while stopping");
                        self.hooks
                            .on_session_end(self.chat, &self.session, EndKind::Canceled);
                    }
                }
                other => debug!(chat = %self.chat, command = ?other, "Dropping command queued behind exit"),
            }
        }

        let owned = self
            .directory
            .publish(self.chat, self.ends.epoch, &self.session, true);
        let _ = self.ends.released.send(true);
        if owned {
            self.directory.persist(self.chat).await;
        }
        info!(chat = %self.chat, state = %self.session.state_at(now), "Session timer stopped");
    }
}

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tempo::{ChatId, EndKind, Session, SessionHooks};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    RestBegin,
    RestFinish,
    End(EndKind),
    Pause,
}

/// Forwards every lifecycle callback into a channel.
pub struct Recorder {
    tx: mpsc::UnboundedSender<(ChatId, Event, Session)>,
}

impl SessionHooks for Recorder {
    fn on_rest_begin(&self, chat: ChatId, session: &Session) {
        let _ = self.tx.send((chat, Event::RestBegin, session.clone()));
    }

    fn on_rest_finish(&self, chat: ChatId, session: &Session) {
        let _ = self.tx.send((chat, Event::RestFinish, session.clone()));
    }

    fn on_session_end(&self, chat: ChatId, session: &Session, kind: EndKind) {
        let _ = self.tx.send((chat, Event::End(kind), session.clone()));
    }

    fn on_session_pause(&self, chat: ChatId, session: &Session) {
        let _ = self.tx.send((chat, Event::Pause, session.clone()));
    }
}

pub struct Events {
    rx: mpsc::UnboundedReceiver<(ChatId, Event, Session)>,
}

impl Events {
    /// Wait up to `within` for the next callback.
    pub async fn next(&mut self, within: Duration) -> (ChatId, Event, Session) {
        tokio::time::timeout(within, self.rx.recv())
            .await
            .expect("timed out waiting for a lifecycle event")
            .expect("recorder dropped")
    }

    /// Assert nothing arrives for `quiet`.
    pub async fn assert_silent(&mut self, quiet: Duration) {
        if let Ok(Some((chat, event, _))) = tokio::time::timeout(quiet, self.rx.recv()).await {
            panic!("unexpected {:?} for chat {}", event, chat);
        }
    }
}

pub fn recorder() -> (Arc<dyn SessionHooks>, Events) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Recorder { tx }), Events { rx })
}

pub const POLL: Duration = Duration::from_millis(50);

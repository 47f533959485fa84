//! Per-conversation settings record

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::session::{Session, SessionTemplate};

/// Identity of one conversation. Zero is reserved and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl ChatId {
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ChatId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Everything stored for a conversation.
///
/// The engine owns `running`; the remaining fields belong to the dispatch
/// layer and are only carried through storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub default_session: SessionTemplate,
    pub running: Option<Session>,
    pub autorun: bool,
    pub is_group: bool,
    pub subscribers: Vec<ChatId>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_session: SessionTemplate::default(),
            running: None,
            autorun: true,
            is_group: false,
            subscribers: Vec::new(),
        }
    }
}

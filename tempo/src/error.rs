//! Error types for the pomodoro engine

use tempo_ipc::ErrorKind;
use thiserror::Error;

use crate::session::MAX_SESSION_SECS;
use crate::settings::ChatId;

/// Failures of the persistence layer.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No record is stored for the conversation
    #[error("no settings stored for chat {0}")]
    NotFound(ChatId),

    /// I/O error from the storage backend
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The persistence actor stopped before replying
    #[error("persistence actor is not running")]
    ActorGone,
}

/// Every way a session command can be refused.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The conversation has no configured cycle (zero sprint duration)
    #[error("session was not set")]
    UninitializedSession,

    #[error("session is already running")]
    AlreadyRunning,

    #[error("session is already paused")]
    AlreadyPaused,

    #[error("session was canceled")]
    AlreadyCanceled,

    #[error("session has already finished")]
    AlreadyFinished,

    #[error("session is not running")]
    SessionNotRunning,

    /// Total cycle time in seconds exceeds [`MAX_SESSION_SECS`]
    #[error("session lasts too long ({0} seconds, limit is {limit})", limit = MAX_SESSION_SECS)]
    SessionTooLong(i64),

    #[error("invalid session template: {0}")]
    InvalidTemplate(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Create an invalid template error
    pub fn invalid_template(msg: impl Into<String>) -> Self {
        Self::InvalidTemplate(msg.into())
    }

    /// Wire representation used by the IPC layer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::UninitializedSession => ErrorKind::UninitializedSession,
            EngineError::AlreadyRunning => ErrorKind::AlreadyRunning,
            EngineError::AlreadyPaused => ErrorKind::AlreadyPaused,
            EngineError::AlreadyCanceled => ErrorKind::AlreadyCanceled,
            EngineError::AlreadyFinished => ErrorKind::AlreadyFinished,
            EngineError::SessionNotRunning => ErrorKind::SessionNotRunning,
            EngineError::SessionTooLong(_) => ErrorKind::SessionTooLong,
            EngineError::InvalidTemplate(_) => ErrorKind::InvalidTemplate,
            EngineError::Storage(_) => ErrorKind::Storage,
        }
    }
}

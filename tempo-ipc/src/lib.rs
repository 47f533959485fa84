//! Inter-process communication between tempo and tempoctl
//!
//! We use Unix domain sockets for local IPC. One connection carries one
//! newline-terminated JSON [`Command`] and one JSON [`Response`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// Commands that tempoctl can send to tempo.
///
/// Every command addresses one conversation through its `chat` id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Start { chat: i64 },
    Pause { chat: i64 },
    Resume { chat: i64 },
    Cancel { chat: i64 },
    Status { chat: i64 },
    /// Store a new default cycle. `sprints: None` means unbounded.
    Configure {
        chat: i64,
        sprints: Option<i32>,
        sprint_minutes: u32,
        rest_minutes: Option<u32>,
    },
    /// Store the classic 4 x 25m + 5m cycle and start it.
    UseClassic { chat: i64 },
    Autorun { chat: i64, enabled: bool },
    Reset { chat: i64 },
}

/// Responses from tempo back to tempoctl
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Started(SessionStatus),
    Status(SessionStatus),
    Configured { summary: String, started: bool },
    Error { kind: ErrorKind, message: String },
}

/// Snapshot of one conversation's session as shown to users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub phase: Phase,
    /// `None` when the cycle is unbounded.
    pub sprint_count: Option<i32>,
    /// `None` when the cycle is unbounded.
    pub sprints_remaining: Option<i32>,
    pub sprint_seconds_left: i64,
    pub rest_seconds_left: i64,
    /// Human readable description of the whole session.
    pub summary: String,
}

/// Classification of a session, in the order it is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Pending,
    Paused,
    Canceled,
    Finished,
    Stopped,
    Running,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Pending => "Pending",
            SessionState::Paused => "Paused",
            SessionState::Canceled => "Canceled",
            SessionState::Finished => "Finished",
            SessionState::Stopped => "Stopped",
            SessionState::Running => "Running",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which half of the cycle a session is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Sprint,
    Rest,
}

/// Failure kinds reported over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    UninitializedSession,
    AlreadyRunning,
    AlreadyPaused,
    AlreadyCanceled,
    AlreadyFinished,
    SessionNotRunning,
    SessionTooLong,
    InvalidTemplate,
    Storage,
    BadRequest,
}

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection refused - is tempo running?")]
    ConnectionRefused,
}

pub const SOCKET_PATH: &str = "/tmp/tempo.sock";

/// Send one command to the daemon listening on `socket` and wait for its reply.
pub async fn send_command(socket: &Path, cmd: &Command) -> Result<Response, IpcError> {
    let mut stream = UnixStream::connect(socket).await.map_err(|e| {
        if matches!(
            e.kind(),
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound
        ) {
            IpcError::ConnectionRefused
        } else {
            IpcError::Io(e)
        }
    })?;

    let msg = serde_json::to_vec(cmd)?;
    stream.write_all(&msg).await?;
    stream.write_all(b"\n").await?;

    // The server closes its side after writing the response.
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    Ok(serde_json::from_slice(&buf)?)
}

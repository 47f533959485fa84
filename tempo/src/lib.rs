//! Per-conversation pomodoro timer engine
//!
//! A [`Session`] runs on its own timer task, receives commands through a
//! bounded queue and is written back through a single persistence actor, so
//! running sessions can be restored after a restart.

pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod notifier;
pub mod persistence;
pub mod session;
pub mod settings;
pub mod timer;

pub use engine::Engine;
pub use error::{EngineError, StorageError};
pub use notifier::Notifier;
pub use persistence::{JsonFileStore, MemoryStore, PersistenceActor, PersistenceHandle};
pub use session::{Session, SessionTemplate, SprintCount};
pub use settings::{ChatId, Settings};
pub use timer::{EndKind, SessionHooks};

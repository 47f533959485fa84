use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::timer::{DEFAULT_POLL_INTERVAL, DEFAULT_QUEUE_CAPACITY};

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub timer: TimerConfig,
    pub storage: StorageConfig,
    pub ipc: IpcConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct TimerConfig {
    pub poll_interval_ms: u64,
    pub queue_capacity: usize,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Defaults to `sessions.json` in the platform data directory.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Json,
    Memory,
    /// No persistence actor at all.
    #[serde(rename = "none")]
    Disabled,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct IpcConfig {
    pub socket_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct NotificationConfig {
    pub desktop: bool,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl TimerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(tempo_ipc::SOCKET_PATH),
        }
    }
}

impl Config {
    pub fn parse(config_str: &str) -> Result<Self> {
        toml::from_str(config_str).context("Failed to parse config")
    }
}

/// Load `tempo.toml` from the platform config directory, or defaults.
pub fn load_config() -> Result<Config> {
    match ProjectDirs::from("com", "tempo", "tempo") {
        Some(proj_dirs) => {
            let path = proj_dirs.config_dir().join("tempo.toml");
            if path.exists() {
                let config_str = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file at {:?}", path))?;
                toml::from_str(&config_str)
                    .with_context(|| format!("Failed to parse config file at {:?}", path))
            } else {
                Ok(Config::default())
            }
        }
        None => Ok(Config::default()),
    }
}

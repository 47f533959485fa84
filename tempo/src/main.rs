use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tempo::config::{load_config, Config, StorageBackend};
use tempo::{ipc, Engine, JsonFileStore, MemoryStore, Notifier, PersistenceActor, PersistenceHandle, SessionHooks};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config()?;
    let persistence = open_storage(&config).await?;

    let engine = Arc::new(Engine::new(persistence).with_timer_config(&config.timer));
    let hooks: Arc<dyn SessionHooks> = Arc::new(Notifier::new(config.notifications.desktop));

    match engine.restore(Arc::clone(&hooks)).await {
        Ok(count) => info!("Restored {} running session(s)", count),
        Err(e) => warn!("Could not restore sessions: {}", e),
    }

    let socket = config.ipc.socket_path.clone();
    tokio::select! {
        res = ipc::serve(&socket, engine, hooks) => {
            if let Err(e) = &res {
                error!("IPC server stopped: {}", e);
            }
            res?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    let _ = std::fs::remove_file(&socket);
    Ok(())
}

/// Spawn the persistence actor over the configured backend.
async fn open_storage(config: &Config) -> Result<Option<PersistenceHandle>> {
    let handle = match config.storage.backend {
        StorageBackend::Disabled => {
            info!("Running without persistence");
            return Ok(None);
        }
        StorageBackend::Memory => PersistenceActor::spawn(MemoryStore::new()).0,
        StorageBackend::Json => {
            let path = match &config.storage.path {
                Some(path) => path.clone(),
                None => JsonFileStore::default_path()?,
            };
            let store = JsonFileStore::open(&path)
                .await
                .with_context(|| format!("Failed to open session store at {:?}", path))?;
            info!("Storing sessions in {}", store.path().display());
            PersistenceActor::spawn(store).0
        }
    };
    Ok(Some(handle))
}

//! Unix domain socket server for IPC

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tempo_ipc::{Command, ErrorKind, Response};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::session::{SessionTemplate, SprintCount, DEFAULT_REST_SECS};
use crate::settings::ChatId;
use crate::timer::SessionHooks;

/// Accept connections on `socket` until the task is dropped.
pub async fn serve(socket: &Path, engine: Arc<Engine>, hooks: Arc<dyn SessionHooks>) -> Result<()> {
    // Remove old socket if it exists
    let _ = std::fs::remove_file(socket);

    let listener = UnixListener::bind(socket)?;
    info!("IPC server listening on {}", socket.display());

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let engine = Arc::clone(&engine);
                let hooks = Arc::clone(&hooks);
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, engine, hooks).await {
                        error!("Error handling client: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: UnixStream,
    engine: Arc<Engine>,
    hooks: Arc<dyn SessionHooks>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    reader.read_line(&mut line).await?;
    let response = match serde_json::from_str::<Command>(&line) {
        Ok(command) => {
            debug!(?command, "Received command");
            dispatch(&engine, hooks, command).await
        }
        Err(e) => Response::Error {
            kind: ErrorKind::BadRequest,
            message: format!("malformed command: {}", e),
        },
    };

    let response_json = serde_json::to_vec(&response)?;
    writer.write_all(&response_json).await?;
    writer.shutdown().await?;

    Ok(())
}

/// Run one command against the engine.
pub async fn dispatch(engine: &Engine, hooks: Arc<dyn SessionHooks>, command: Command) -> Response {
    let result = match command {
        Command::Start { chat } => engine.start(ChatId(chat), hooks).await.map(Response::Started),
        Command::Pause { chat } => engine.pause(ChatId(chat)).await.map(|_| Response::Ok),
        Command::Resume { chat } => engine.resume(ChatId(chat), hooks).await.map(Response::Started),
        Command::Cancel { chat } => engine.cancel(ChatId(chat), hooks).await.map(|_| Response::Ok),
        Command::Status { chat } => engine.status(ChatId(chat)).await.map(Response::Status),
        Command::Configure {
            chat,
            sprints,
            sprint_minutes,
            rest_minutes,
        } => {
            let template = SessionTemplate::new(
                sprints.map_or(SprintCount::UNBOUNDED, SprintCount::new),
                i64::from(sprint_minutes) * 60,
                rest_minutes.map_or(DEFAULT_REST_SECS, |m| i64::from(m) * 60),
            );
            configure(engine, hooks, ChatId(chat), template).await
        }
        Command::UseClassic { chat } => {
            let chat = ChatId(chat);
            match engine.use_classic(chat).await {
                Ok(()) => engine.start(chat, hooks).await.map(Response::Started),
                Err(e) => Err(e),
            }
        }
        Command::Autorun { chat, enabled } => engine
            .set_autorun(ChatId(chat), enabled)
            .await
            .map(|_| Response::Ok),
        Command::Reset { chat } => engine.reset(ChatId(chat)).await.map(|_| Response::Ok),
    };

    result.unwrap_or_else(|e| Response::Error {
        kind: e.kind(),
        message: e.to_string(),
    })
}

/// Store the template and autostart it when the conversation asks for that.
async fn configure(
    engine: &Engine,
    hooks: Arc<dyn SessionHooks>,
    chat: ChatId,
    template: SessionTemplate,
) -> Result<Response, EngineError> {
    let autorun = engine.configure(chat, template).await?;
    let started = autorun && engine.start(chat, hooks).await.is_ok();
    Ok(Response::Configured {
        summary: template.to_string(),
        started,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::Notifier;
    use tempo_ipc::SessionState;

    fn hooks() -> Arc<dyn SessionHooks> {
        Arc::new(Notifier::default())
    }

    #[tokio::test]
    async fn configure_autostarts() {
        let engine = Engine::new(None);
        let response = dispatch(
            &engine,
            hooks(),
            Command::Configure {
                chat: 1,
                sprints: Some(2),
                sprint_minutes: 25,
                rest_minutes: None,
            },
        )
        .await;
        assert_eq!(
            response,
            Response::Configured {
                summary: "Session of 2🍅 x 25m + 5m".to_string(),
                started: true,
            }
        );

        let Response::Status(status) = dispatch(&engine, hooks(), Command::Status { chat: 1 }).await
        else {
            panic!("expected a status response");
        };
        assert_eq!(status.state, SessionState::Running);
    }

    #[tokio::test]
    async fn errors_carry_their_kind() {
        let engine = Engine::new(None);
        let response = dispatch(&engine, hooks(), Command::Start { chat: 1 }).await;
        assert!(matches!(
            response,
            Response::Error {
                kind: ErrorKind::UninitializedSession,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn socket_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("tempo.sock");
        let engine = Arc::new(Engine::new(None));

        let server = {
            let socket = socket.clone();
            tokio::spawn(async move { serve(&socket, engine, hooks()).await })
        };
        while !socket.exists() {
            tokio::task::yield_now().await;
        }

        let response = tempo_ipc::send_command(&socket, &Command::UseClassic { chat: 5 })
            .await
            .unwrap();
        assert!(matches!(response, Response::Started(_)));

        server.abort();
    }
}

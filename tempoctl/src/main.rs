use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tempo_ipc::{send_command, Command, Response, SessionStatus, SOCKET_PATH};

#[derive(Parser)]
#[command(name = "tempoctl")]
#[command(about = "Control the tempo pomodoro daemon", long_about = None)]
struct Cli {
    /// Socket the daemon listens on
    #[arg(long, default_value = SOCKET_PATH)]
    socket: PathBuf,

    /// Conversation to address
    #[arg(long, default_value_t = 1)]
    chat: i64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new cycle from the configured template
    Start,
    /// Pause the running session
    Pause,
    /// Resume a paused session
    Resume,
    /// Cancel the session
    Cancel,
    /// Show the session status
    Status,
    /// Configure the default cycle
    Configure {
        /// Sprint length in minutes
        sprint_minutes: u32,
        /// Number of sprints; omit for an unbounded cycle
        #[arg(short, long)]
        sprints: Option<i32>,
        /// Rest length in minutes (default 5)
        #[arg(short, long)]
        rest: Option<u32>,
    },
    /// Use and start the classic 4 x 25m + 5m cycle
    Classic,
    /// Turn autostart after configure on or off
    Autorun {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Forget everything stored for the conversation
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let chat = cli.chat;

    let command = match cli.command {
        Commands::Start => Command::Start { chat },
        Commands::Pause => Command::Pause { chat },
        Commands::Resume => Command::Resume { chat },
        Commands::Cancel => Command::Cancel { chat },
        Commands::Status => Command::Status { chat },
        Commands::Configure {
            sprint_minutes,
            sprints,
            rest,
        } => Command::Configure {
            chat,
            sprints,
            sprint_minutes,
            rest_minutes: rest,
        },
        Commands::Classic => Command::UseClassic { chat },
        Commands::Autorun { enabled } => Command::Autorun { chat, enabled },
        Commands::Reset => Command::Reset { chat },
    };

    match send_command(&cli.socket, &command).await? {
        Response::Ok => println!("OK"),
        Response::Started(status) => {
            println!("Session started.");
            print_status(&status);
        }
        Response::Status(status) => print_status(&status),
        Response::Configured { summary, started } => {
            println!("{}", summary);
            if started {
                println!("Session started.");
            }
        }
        Response::Error { kind, message } => bail!("{:?}: {}", kind, message),
    }

    Ok(())
}

fn print_status(status: &SessionStatus) {
    println!("{}", status.summary);
    println!();
    println!("Phase: {:?}", status.phase);
    println!("Sprint left: {}s", status.sprint_seconds_left);
    println!("Rest left: {}s", status.rest_seconds_left);
}

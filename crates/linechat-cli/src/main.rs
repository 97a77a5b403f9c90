//! linechat CLI — talk to one other person over a direct TCP connection.
//!
//! Lines typed on stdin are sent to the peer; the transcript (sent and
//! received messages plus connection status) is printed to stdout. Logs go
//! to stderr.

mod input_handler;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use linechat_core::setup::load_config;
use linechat_core::{ChannelNotifier, ChatEvent, Config, Connection, ConnectionState, Endpoint};
use tokio::sync::mpsc;

use input_handler::{spawn_stdin_reader, Command};

#[derive(Parser)]
#[command(
    name = "linechat",
    about = "Two-user line chat over a direct TCP connection",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for one peer to connect.
    Listen {
        /// Port to listen on.
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind.
        #[arg(short, long)]
        bind: Option<IpAddr>,
    },

    /// Connect to a listening peer.
    Connect {
        /// Host name or address of the peer.
        host: Option<String>,

        /// Port the peer listens on.
        #[arg(short, long)]
        port: Option<u16>,
    },
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve the endpoint from CLI flags, falling back to the config file.
fn endpoint(command: Commands, config: &Config) -> anyhow::Result<Endpoint> {
    match command {
        Commands::Listen { port, bind } => {
            let ip = match bind {
                Some(ip) => ip,
                None => config
                    .listen
                    .bind
                    .parse()
                    .with_context(|| format!("invalid bind address {:?}", config.listen.bind))?,
            };
            let port = port.unwrap_or(config.listen.port);
            Ok(Endpoint::Listen {
                addr: SocketAddr::new(ip, port),
            })
        }
        Commands::Connect { host, port } => {
            let host = host.unwrap_or_else(|| config.remote.host.clone());
            if host.trim().is_empty() {
                bail!("host name must not be empty");
            }
            let port = port.unwrap_or(config.remote.port);
            Ok(Endpoint::dial(host, port))
        }
    }
}

/// Carry out queued commands in order on their own task, so a send stalled
/// on a slow peer never holds up the session loop.
fn spawn_sender(conn: Connection) -> mpsc::UnboundedSender<Command> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Message(text) => conn.send(&text).await,
                Command::Quit => {
                    conn.close();
                    break;
                }
            }
        }
    });
    tx
}

/// Drive one session until the connection reports that it has closed.
async fn run(conn: &Connection, mut events: mpsc::UnboundedReceiver<ChatEvent>) {
    let mut input = spawn_stdin_reader();
    let mut input_open = true;
    let outgoing = spawn_sender(conn.clone());

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                println!("{event}");
                if event == ChatEvent::Closed {
                    break;
                }
            }
            line = input.recv(), if input_open => match line.as_deref().map(Command::parse) {
                Some(Command::Message(text)) => {
                    if conn.state() == ConnectionState::Connected {
                        if outgoing.send(Command::Message(text)).is_err() {
                            tracing::debug!("sender task gone, message dropped");
                        }
                    } else {
                        eprintln!("not connected (state: {})", conn.state());
                    }
                }
                Some(Command::Quit) => conn.close(),
                None => {
                    tracing::debug!("end of input");
                    input_open = false;
                    // Close only after everything typed so far has gone out
                    if outgoing.send(Command::Quit).is_err() {
                        conn.close();
                    }
                }
            },
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "failed to listen for ctrl-c");
                }
                conn.close();
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.logging.level);

    let endpoint = endpoint(cli.command, &config)?;
    tracing::info!(endpoint = %endpoint, "starting linechat");

    let (notifier, events) = ChannelNotifier::new();
    let conn = Connection::open(endpoint, notifier);

    run(&conn, events).await;
    conn.closed().await;

    Ok(())
}

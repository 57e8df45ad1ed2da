//! Broadcast Chat - Entry Point
//!
//! `serve` hosts the chat server; `connect` joins one as a client. Both read
//! lines from stdin to send and print received messages to stdout.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use duplex_chat::config::{DEFAULT_ADDRESS, DEFAULT_HOST, DEFAULT_PORT};
use duplex_chat::{
    server, ChannelOptions, ChatMessage, ClientConfig, ClientTransport, ConnectionController,
    MessageService, ServerConfig,
};

#[derive(Debug, Parser)]
#[command(name = "duplex-chat", version, about = "Real-time broadcast chat over WebSocket")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Host the chat server
    Serve {
        /// Interface to bind
        #[arg(long, env = "DUPLEX_CHAT_HOST", default_value = DEFAULT_HOST)]
        host: String,
        /// Port to bind
        #[arg(short, long, env = "DUPLEX_CHAT_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Seconds connections get to drain on shutdown
        #[arg(long, default_value_t = 5)]
        grace_secs: u64,
    },
    /// Connect to a chat server
    Connect {
        /// Server address
        #[arg(short, long, env = "DUPLEX_CHAT_ADDRESS", default_value = DEFAULT_ADDRESS)]
        address: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=duplex_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("duplex_chat=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            host,
            port,
            grace_secs,
        } => {
            let config = ServerConfig {
                host,
                port,
                shutdown_grace: Duration::from_secs(grace_secs),
                ..ServerConfig::default()
            };
            run_server(config).await?;
        }
        Command::Connect { address } => {
            run_client(ClientConfig { address }).await?;
        }
    }

    Ok(())
}

async fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (host, broadcast) = server::build(config);
    host.start().await?;

    let mut messages = broadcast.messages();
    tokio::spawn(async move {
        loop {
            match messages.recv().await {
                Ok(message) => print_message(&message),
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} messages", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut counts = broadcast.connected_count_changes();
    tokio::spawn(async move {
        while let Ok(count) = counts.recv().await {
            info!("Connected clients: {}", count);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match broadcast.broadcast_message(&line).await {
                    Ok(message) => print_message(&message),
                    Err(e) => error!("{}", e),
                },
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            },
        }
    }

    host.stop().await?;
    Ok(())
}

async fn run_client(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let transport = Arc::new(ClientTransport::new());
    let controller = ConnectionController::new(Arc::clone(&transport), ChannelOptions::development());
    let service = MessageService::new(transport);

    let mut status = controller.status_changes();
    tokio::spawn(async move {
        while let Ok(status) = status.recv().await {
            info!("Connection status: {}", status);
        }
    });

    controller.connect(&config.address).await?;

    let mut messages = service.messages();
    service.start_receiving();
    tokio::spawn(async move {
        loop {
            match messages.recv().await {
                Ok(message) => print_message(&message),
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} messages", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match service.send_message(&line).await {
                    // The server does not echo our own messages; show the local copy
                    Ok(message) => print_message(&message),
                    Err(e) if e.is_not_connected() => {
                        warn!("Connection is gone, leaving chat");
                        break;
                    }
                    Err(e) => error!("{}", e),
                },
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            },
        }
    }

    service.stop_receiving();
    controller.disconnect().await;
    Ok(())
}

fn print_message(message: &ChatMessage) {
    let time = message.timestamp().with_timezone(&chrono::Local);
    println!(
        "[{}] {}: {}",
        time.format("%H:%M:%S"),
        message.sender(),
        message.content()
    );
}

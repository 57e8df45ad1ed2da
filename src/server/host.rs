//! Server host
//!
//! Owns the TCP listener and the accept loop. Each accepted connection runs in
//! its own task; on stop they get a grace period to finish before being
//! aborted.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::error::{ChatError, Result};
use crate::feed::StateCell;
use crate::server::handler::StreamHandler;
use crate::types::ServerStatus;

struct Running {
    shutdown: CancellationToken,
    accept_task: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// Starts and stops the chat server
pub struct ServerHost {
    config: ServerConfig,
    handler: Arc<StreamHandler>,
    status: StateCell<ServerStatus>,
    /// Live listener state; the lock also serializes start/stop
    running: Mutex<Option<Running>>,
}

impl ServerHost {
    pub fn new(config: ServerConfig, handler: Arc<StreamHandler>) -> Self {
        Self {
            config,
            handler,
            status: StateCell::new(ServerStatus::Stopped),
            running: Mutex::new(None),
        }
    }

    pub fn status(&self) -> ServerStatus {
        self.status.get()
    }

    /// Change-only feed of status transitions
    pub fn status_changes(&self) -> broadcast::Receiver<ServerStatus> {
        self.status.subscribe()
    }

    /// Address the listener is bound to while running
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Bind the listener and start accepting connections
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;

        match self.status.get() {
            ServerStatus::Running => {
                return Err(ChatError::ServerStart("Server is already running".to_string()))
            }
            ServerStatus::Error => {
                self.status.transition(ServerStatus::Stopped);
            }
            _ => {}
        }

        self.status.transition(ServerStatus::Starting);

        let (listener, local_addr) = match bind(&self.config.bind_addr()).await {
            Ok(bound) => bound,
            Err(e) => {
                self.status.transition(ServerStatus::Error);
                error!("Failed to start server: {}", e);
                return Err(ChatError::ServerStart(e.to_string()));
            }
        };

        let shutdown = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.handler),
            shutdown.clone(),
            self.config.shutdown_grace,
        ));

        *running = Some(Running {
            shutdown,
            accept_task,
            local_addr,
        });
        self.status.transition(ServerStatus::Running);
        info!("Chat server listening on {}", local_addr);

        Ok(())
    }

    /// Stop accepting, drain connections, and return to Stopped
    ///
    /// Calling it when the server is not running is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let mut running = self.running.lock().await;

        let Some(active) = running.take() else {
            self.status.transition(ServerStatus::Stopped);
            return Ok(());
        };

        info!("Stopping chat server on {}", active.local_addr);
        active.shutdown.cancel();
        let result = active.accept_task.await;

        self.status.transition(ServerStatus::Stopped);
        info!("Chat server stopped");

        result.map_err(|e| ChatError::ServerStop(e.to_string()))
    }
}

impl Drop for ServerHost {
    fn drop(&mut self) {
        if let Some(active) = self.running.get_mut().take() {
            active.shutdown.cancel();
        }
    }
}

async fn bind(addr: &str) -> std::io::Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    Ok((listener, local_addr))
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<StreamHandler>,
    shutdown: CancellationToken,
    grace: Duration,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!("New connection from {}", addr);
                    let handler = Arc::clone(&handler);
                    let shutdown = shutdown.clone();

                    // Spawn handler task for each connection
                    connections.spawn(async move {
                        if let Err(e) = handler.handle_connection(stream, shutdown).await {
                            error!("Connection handler error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);

    let drained = tokio::time::timeout(grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            "{} connections still open after {:?}, aborting",
            connections.len(),
            grace
        );
        connections.shutdown().await;
    }
}

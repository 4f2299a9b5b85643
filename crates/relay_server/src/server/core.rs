//! Core relay server implementation.
//!
//! This module contains the main `RelayServer` struct: it binds the WebSocket
//! endpoint, runs the accept loop, and owns the state every session shares.

use crate::{
    config::ServerConfig,
    connection::ConnectionRegistry,
    error::RelayError,
    server::handlers::handle_connection,
    shutdown::ShutdownState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace};

/// Backlog of the WebSocket listener.
const LISTENER_BACKLOG: u32 = 1024;

/// Pause after a failed accept so a persistent error cannot spin the loop.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// How often the accept loop checks an externally driven [`ShutdownState`].
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The WebSocket relay server.
///
/// Each accepted WebSocket becomes an independent session. Sessions share the
/// [`ConnectionRegistry`] so a TCP connection accepted by one session's
/// listening socket can be claimed by id.
pub struct RelayServer {
    /// Server configuration settings
    config: Arc<ServerConfig>,

    /// Accepted TCP connections, shared by every session
    registry: Arc<ConnectionRegistry>,

    /// Channel for coordinating server shutdown
    shutdown_sender: broadcast::Sender<()>,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_sender, _) = broadcast::channel(1);
        Self {
            config: Arc::new(config),
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown_sender,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// Binds the WebSocket endpoint at the configured address.
    pub fn bind(&self) -> Result<TcpListener, RelayError> {
        let address = self.config.bind_address;
        let socket = match address {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(|e| RelayError::Network(format!("Failed to create listener socket: {e}")))?;
        socket
            .set_reuseaddr(true)
            .map_err(|e| RelayError::Network(format!("SO_REUSEADDR failed: {e}")))?;
        socket
            .bind(address)
            .map_err(|e| RelayError::Network(format!("Failed to bind {address}: {e}")))?;
        socket
            .listen(LISTENER_BACKLOG)
            .map_err(|e| RelayError::Network(format!("Failed to listen on {address}: {e}")))
    }

    /// Binds and serves until [`RelayServer::shutdown`] is called.
    pub async fn start(&self) -> Result<(), RelayError> {
        let listener = self.bind()?;
        self.serve(listener, None).await
    }

    /// Binds and serves until `shutdown_state` is initiated or
    /// [`RelayServer::shutdown`] is called.
    pub async fn start_with_shutdown_state(&self, shutdown_state: ShutdownState) -> Result<(), RelayError> {
        let listener = self.bind()?;
        self.serve(listener, Some(shutdown_state)).await
    }

    /// Runs the accept loop on an already bound listener.
    ///
    /// When shutdown begins every live session is closed with code 1001 and
    /// its sockets are released.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown_state: Option<ShutdownState>,
    ) -> Result<(), RelayError> {
        match listener.local_addr() {
            Ok(addr) => info!("🚀 Relay server up and listening on {}", addr),
            Err(e) => debug!("Listener has no local address: {}", e),
        }

        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        let mut shutdown_poll = tokio::time::interval(SHUTDOWN_POLL_INTERVAL);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        trace!("Incoming connection from {}", addr);
                        let registry = self.registry.clone();
                        let config = self.config.clone();
                        let session_shutdown = self.shutdown_sender.subscribe();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, registry, config, session_shutdown).await {
                                error!("Connection error from {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                },
                _ = shutdown_receiver.recv() => {
                    info!("Internal shutdown signal received");
                    break;
                }
                _ = shutdown_poll.tick() => {
                    if shutdown_state.as_ref().is_some_and(ShutdownState::is_shutdown_initiated) {
                        info!("🛑 Accept loop stopping - shutdown initiated");
                        break;
                    }
                }
            }
        }

        // Tell every session to close; the receiver count is how many were live.
        drop(shutdown_receiver);
        let sessions = self.shutdown_sender.send(()).unwrap_or(0);
        info!("🧹 Closing {} live session(s)", sessions);
        if let Some(state) = shutdown_state {
            state.complete_shutdown();
        }
        info!("✅ Server stopped");
        Ok(())
    }

    /// Stops the accept loop and closes every session.
    pub fn shutdown(&self) {
        let _ = self.shutdown_sender.send(());
    }
}

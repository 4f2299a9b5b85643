//! Per-WebSocket client session.
//!
//! A [`GameClient`] owns every socket adapter its client created and routes
//! inbound frames to them. All frame handling is synchronous; the session
//! task in `server::handlers` feeds frames in arrival order, which is what
//! keeps the "binary frame goes to the last named socket" contract sound.

use super::outbound::{OutboundMessage, OutboundSender, SocketOutbound};
use super::registry::ConnectionRegistry;
use crate::config::ServerConfig;
use crate::error::RelayError;
use crate::messaging::types::{event, ServerMessage};
use crate::messaging::{ClientCommand, ReceiveState, SocketHandle};
use crate::sockets::GameSocket;
use crate::utils::host_name;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Close code for clients that break the protocol.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;

/// Close code used when the server shuts down.
pub const CLOSE_GOING_AWAY: u16 = 1001;

pub struct GameClient {
    peer_addr: SocketAddr,
    outbound: OutboundSender,
    registry: Arc<ConnectionRegistry>,
    config: Arc<ServerConfig>,
    sockets: HashMap<SocketHandle, GameSocket>,
    receive_state: ReceiveState,
    closing: bool,
}

impl GameClient {
    /// Starts a session and greets the client with the server's host name.
    pub fn new(
        peer_addr: SocketAddr,
        outbound: OutboundSender,
        registry: Arc<ConnectionRegistry>,
        config: Arc<ServerConfig>,
    ) -> Self {
        let client = Self {
            peer_addr,
            outbound,
            registry,
            config,
            sockets: HashMap::new(),
            receive_state: ReceiveState::default(),
            closing: false,
        };
        let hostname = ServerMessage::new(event::HOSTNAME, None, json!(host_name()));
        if client.outbound.send(OutboundMessage::Typed(hostname)).is_err() {
            debug!("Session {}: writer gone before greeting", peer_addr);
        }
        client
    }

    /// Handles one inbound data frame.
    ///
    /// A returned protocol violation means the session must be rejected; the
    /// caller decides, so tests can observe the error directly.
    pub fn on_websocket_message(&mut self, data: &[u8], is_binary: bool) -> Result<(), RelayError> {
        if self.closing {
            return Ok(());
        }
        if is_binary {
            return self.on_binary_frame(data);
        }
        let text = std::str::from_utf8(data).map_err(|_| {
            RelayError::protocol(format!("Malformed JSON message: {}", String::from_utf8_lossy(data)))
        })?;
        self.on_command(ClientCommand::parse(text)?)
    }

    fn on_command(&mut self, command: ClientCommand) -> Result<(), RelayError> {
        let handle = command.socket;
        self.receive_state.on_command(handle);

        if command.is_create() {
            let outbound = SocketOutbound::new(handle, self.outbound.clone());
            let socket = GameSocket::create(outbound, &command.payload, &self.config, self.registry.clone())?;
            if let Some(previous) = self.sockets.insert(handle, socket) {
                warn!("GameSocket #{}: re-created, closing previous socket", handle);
                previous.close();
            }
            return Ok(());
        }

        let socket = self
            .sockets
            .get_mut(&handle)
            .ok_or_else(|| RelayError::protocol(format!("Socket ID not recognized: {handle}")))?;
        socket.on_action_message(&command.action, &command.payload)
    }

    fn on_binary_frame(&mut self, data: &[u8]) -> Result<(), RelayError> {
        let socket = self
            .receive_state
            .take_binary_recipient()
            .and_then(|handle| self.sockets.get_mut(&handle))
            .ok_or_else(|| RelayError::protocol("Received binary data before destination address!"))?;
        socket.on_binary_message(data)
    }

    /// Closes the session with a protocol error.
    pub fn reject(&mut self, reason: &str) {
        error!("Session {}: rejecting client: {}", self.peer_addr, reason);
        self.close(CLOSE_PROTOCOL_ERROR, reason);
    }

    /// Queues a close frame; nothing is sent or handled after it.
    pub fn close(&mut self, code: u16, reason: &str) {
        if self.closing {
            return;
        }
        self.closing = true;
        let _ = self.outbound.send(OutboundMessage::Close {
            code,
            reason: reason.to_string(),
        });
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn on_websocket_error(&self, err: &dyn std::fmt::Display) {
        warn!("Session {}: WebSocket connection error: {}", self.peer_addr, err);
    }

    /// Tears the session down, closing every socket exactly once.
    ///
    /// Returns how many sockets were closed.
    pub fn on_websocket_close(&mut self) -> usize {
        let count = self.sockets.len();
        for (_, socket) in self.sockets.drain() {
            socket.close();
        }
        info!("Session {}: closed, released {} socket(s)", self.peer_addr, count);
        count
    }

    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    pub fn has_socket(&self, handle: SocketHandle) -> bool {
        self.sockets.contains_key(&handle)
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        if !self.sockets.is_empty() {
            self.on_websocket_close();
        }
    }
}

//! Socket adapters that relay between a client session and the network.
//!
//! Every adapter is a [`GameSocket`]: a client-assigned handle, the current
//! destination for outbound binary data, and one of three transport kinds.
//! Actions are dispatched through [`GameSocket::on_action_message`], which
//! rejects anything the kind does not support.

pub mod coalescer;
pub mod tcp_connection;
pub mod tcp_server;
pub mod udp;

pub use coalescer::WriteCoalescer;
pub use tcp_connection::TcpConnectionGameSocket;
pub use tcp_server::TcpServerGameSocket;
pub use udp::UdpGameSocket;

use crate::config::ServerConfig;
use crate::connection::{ConnectionRegistry, SocketOutbound};
use crate::error::RelayError;
use crate::messaging::types::{parse_backlog, parse_bind_port, parse_destination, CreateRequest, SocketHandle};
use serde_json::Value;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// Per-socket actions a client can send after `create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketAction {
    /// Set the destination of following binary frames
    Binary,
    /// Bind a local port
    Bind,
    /// Start accepting TCP connections
    Listen,
}

impl SocketAction {
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "binary" => Some(Self::Binary),
            "bind" => Some(Self::Bind),
            "listen" => Some(Self::Listen),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::Bind => "bind",
            Self::Listen => "listen",
        }
    }
}

impl fmt::Display for SocketAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport-specific half of a [`GameSocket`].
#[derive(Debug)]
pub enum SocketKind {
    Udp(UdpGameSocket),
    TcpServer(TcpServerGameSocket),
    TcpConnection(TcpConnectionGameSocket),
}

impl SocketKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Udp(_) => "UDP",
            Self::TcpServer(_) => "TCP server",
            Self::TcpConnection(_) => "TCP connection",
        }
    }
}

/// One client-visible socket.
#[derive(Debug)]
pub struct GameSocket {
    handle: SocketHandle,
    destination: Option<SocketAddr>,
    kind: SocketKind,
}

impl GameSocket {
    /// Builds the adapter a `create` payload asks for.
    ///
    /// Creating a TCP connection adapter claims the accepted connection right
    /// away; claiming one that is already owned fails the whole command.
    pub fn create(
        outbound: SocketOutbound,
        payload: &Value,
        config: &ServerConfig,
        registry: Arc<ConnectionRegistry>,
    ) -> Result<Self, RelayError> {
        let handle = outbound.handle();
        let kind = match CreateRequest::from_payload(payload)? {
            CreateRequest::Udp { reuse_address } => SocketKind::Udp(UdpGameSocket::new(
                outbound,
                reuse_address,
                config.udp_recv_buffer_size,
            )),
            CreateRequest::TcpServer => {
                SocketKind::TcpServer(TcpServerGameSocket::new(outbound, registry, config.tcp_nodelay))
            }
            CreateRequest::TcpConnection { connection_id } => SocketKind::TcpConnection(
                TcpConnectionGameSocket::claim(outbound, registry, connection_id, config)?,
            ),
        };
        debug!("GameSocket #{}: created {} socket", handle, kind.name());
        Ok(Self {
            handle,
            destination: None,
            kind,
        })
    }

    pub fn handle(&self) -> SocketHandle {
        self.handle
    }

    pub fn kind(&self) -> &SocketKind {
        &self.kind
    }

    pub fn destination(&self) -> Option<SocketAddr> {
        self.destination
    }

    /// Actions this socket's kind accepts.
    pub fn supported_actions(&self) -> &'static [SocketAction] {
        match self.kind {
            SocketKind::Udp(_) | SocketKind::TcpConnection(_) => &[SocketAction::Bind, SocketAction::Binary],
            SocketKind::TcpServer(_) => &[SocketAction::Bind, SocketAction::Binary, SocketAction::Listen],
        }
    }

    /// Handles a per-socket action.
    pub fn on_action_message(&mut self, action: &str, payload: &Value) -> Result<(), RelayError> {
        let supported = SocketAction::parse(action)
            .filter(|parsed| self.supported_actions().contains(parsed));
        let Some(action) = supported else {
            return Err(RelayError::protocol(format!(
                "GameSocket #{}: No handler for action {}!",
                self.handle, action
            )));
        };

        match (action, &mut self.kind) {
            (SocketAction::Binary, _) => {
                self.destination = parse_destination(payload);
                if self.destination.is_none() {
                    debug!("GameSocket #{}: binary action without a usable destination", self.handle);
                }
            }
            (SocketAction::Bind, SocketKind::Udp(udp)) => udp.bind(parse_bind_port(payload)?),
            (SocketAction::Bind, SocketKind::TcpServer(server)) => server.bind(parse_bind_port(payload)?),
            (SocketAction::Listen, SocketKind::TcpServer(server)) => server.listen(parse_backlog(payload)),
            // An accepted connection is already bound.
            (SocketAction::Bind, SocketKind::TcpConnection(_)) => {
                debug!("GameSocket #{}: bind ignored on a TCP connection", self.handle)
            }
            (action, kind) => {
                return Err(RelayError::protocol(format!(
                    "GameSocket #{}: No handler for action {} on {} socket!",
                    self.handle,
                    action,
                    kind.name()
                )))
            }
        }
        Ok(())
    }

    /// Relays a binary frame out of this socket.
    pub fn on_binary_message(&mut self, data: &[u8]) -> Result<(), RelayError> {
        match &mut self.kind {
            SocketKind::Udp(udp) => udp.on_binary_message(self.destination, data),
            SocketKind::TcpConnection(connection) => {
                connection.on_binary_message(data);
                Ok(())
            }
            SocketKind::TcpServer(_) => {
                debug!("GameSocket #{}: dropping {} bytes sent to a TCP server socket", self.handle, data.len());
                Ok(())
            }
        }
    }

    /// Releases the socket and stops its tasks.
    pub fn close(self) {
        match self.kind {
            SocketKind::Udp(udp) => udp.close(),
            SocketKind::TcpServer(server) => server.close(),
            SocketKind::TcpConnection(connection) => connection.close(),
        }
    }
}

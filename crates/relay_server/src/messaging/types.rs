//! Message type definitions for client-server communication.
//!
//! The relay speaks a small JSON protocol over WebSocket text frames. Clients
//! send commands addressed to a socket handle, the server answers with typed
//! events addressed the same way. Raw payload bytes travel in binary frames
//! whose routing is implied by the text frame sent just before them.

use crate::error::RelayError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::{IpAddr, SocketAddr};

/// Client-assigned identifier of one socket adapter within a session.
pub type SocketHandle = i64;

/// Process-wide identifier of an accepted inbound TCP connection.
pub type TcpConnectionId = u64;

/// `AF_INET` as reported to clients.
pub const FAMILY_IPV4: u8 = 2;

/// `AF_INET6` as reported to clients.
pub const FAMILY_IPV6: u8 = 10;

/// Backlog used when a `listen` action does not carry a usable number.
pub const DEFAULT_BACKLOG: u32 = 511;

/// Server-emitted event type names.
pub mod event {
    pub const HOSTNAME: &str = "hostname";
    pub const LISTENING: &str = "listening";
    pub const BIND_FAIL: &str = "bindfail";
    pub const CLIENT_CONNECTED: &str = "clientconnected";
    pub const CLIENT_DISCONNECTED: &str = "clientdisconnected";
    pub const BINARY: &str = "binary";
}

/// A command sent from a client to the server.
///
/// ```json
/// { "action": "bind", "socket": 1, "payload": { "port": 9000 } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientCommand {
    /// What to do (`create`, `bind`, `listen`, `binary`)
    pub action: String,

    /// The handle of the socket the command is addressed to
    pub socket: SocketHandle,

    /// Action-specific arguments
    #[serde(default)]
    pub payload: Value,
}

impl ClientCommand {
    /// Parses a text frame into a command.
    ///
    /// Anything that is not a JSON object with a non-empty string `action`
    /// and an integer `socket` is a protocol violation.
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        let command: ClientCommand = serde_json::from_str(text)
            .map_err(|_| RelayError::protocol(format!("Malformed JSON message: {text}")))?;
        if command.action.is_empty() {
            return Err(RelayError::protocol(format!("Malformed JSON message: {text}")));
        }
        Ok(command)
    }

    pub fn is_create(&self) -> bool {
        self.action == "create"
    }
}

/// An event sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    /// Event type, see [`event`]
    #[serde(rename = "type")]
    pub kind: String,

    /// Originating socket; absent for session-wide events like `hostname`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket: Option<SocketHandle>,

    /// Event-specific data
    pub payload: Value,
}

impl ServerMessage {
    pub fn new(kind: &str, socket: Option<SocketHandle>, payload: Value) -> Self {
        Self {
            kind: kind.to_string(),
            socket,
            payload,
        }
    }
}

/// The kind of adapter a `create` command asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateRequest {
    /// `type: 1`
    Udp { reuse_address: bool },
    /// `type: 2, tcpConnectionId: 0`
    TcpServer,
    /// `type: 2` with any other connection id; `None` when the id is not a
    /// usable number, which yields an inert adapter.
    TcpConnection { connection_id: Option<TcpConnectionId> },
}

impl CreateRequest {
    pub fn from_payload(payload: &Value) -> Result<Self, RelayError> {
        match payload.get("type").and_then(loose_number) {
            Some(kind) if kind == 1.0 => Ok(Self::Udp {
                reuse_address: payload
                    .get("reuseaddress")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }),
            Some(kind) if kind == 2.0 => {
                let id = payload.get("tcpConnectionId").and_then(loose_number);
                if id == Some(0.0) {
                    Ok(Self::TcpServer)
                } else {
                    Ok(Self::TcpConnection {
                        connection_id: id
                            .filter(|id| *id >= 1.0 && id.fract() == 0.0 && *id <= u64::MAX as f64)
                            .map(|id| id as TcpConnectionId),
                    })
                }
            }
            _ => Err(RelayError::protocol("Unsupported socket type.")),
        }
    }
}

/// Reads a `create` field the way the browser client's loose equality does:
/// numbers as-is, numeric strings parsed, and a blank string as zero.
fn loose_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) if text.trim().is_empty() => Some(0.0),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Extracts the port of a `bind` payload.
///
/// The port must be an integer in `0..=65535`; anything else is rejected
/// before any socket is touched.
pub fn parse_bind_port(payload: &Value) -> Result<u16, RelayError> {
    payload
        .get("port")
        .and_then(Value::as_u64)
        .and_then(|port| u16::try_from(port).ok())
        .ok_or_else(|| RelayError::protocol("Received bind command without valid port number!"))
}

/// Extracts the backlog of a `listen` payload, which is a bare number.
pub fn parse_backlog(payload: &Value) -> u32 {
    payload
        .as_u64()
        .map(|backlog| u32::try_from(backlog).unwrap_or(u32::MAX))
        .unwrap_or(DEFAULT_BACKLOG)
}

/// Extracts the destination of a `binary` action.
///
/// Accepts both `{addr: {family, port, addr}}` and `{family, port, addr}`.
/// Returns `None` unless the payload names a literal IP address and a valid
/// port.
pub fn parse_destination(payload: &Value) -> Option<SocketAddr> {
    let target = match payload.get("addr") {
        Some(nested) if nested.is_object() => nested,
        _ => payload,
    };
    let port = target
        .get("port")
        .and_then(Value::as_u64)
        .and_then(|port| u16::try_from(port).ok())?;
    let ip: IpAddr = target.get("addr").and_then(Value::as_str)?.parse().ok()?;
    Some(SocketAddr::new(ip, port))
}

/// Address triple reported in `listening`, `clientconnected` and UDP
/// `binary` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInfo {
    pub family: u8,
    pub port: u16,
    pub addr: String,
}

impl AddressInfo {
    pub fn to_payload(&self) -> Value {
        json!({ "family": self.family, "port": self.port, "addr": self.addr })
    }
}

impl From<SocketAddr> for AddressInfo {
    fn from(addr: SocketAddr) -> Self {
        let family = if addr.is_ipv4() { FAMILY_IPV4 } else { FAMILY_IPV6 };
        Self {
            family,
            port: addr.port(),
            addr: addr.ip().to_string(),
        }
    }
}

//! # Relay Server - WebSocket to TCP/UDP gateway
//!
//! Browser-hosted tools cannot open raw sockets. This crate lets them anyway:
//! a client connects over WebSocket and asks the server to create UDP
//! sockets, TCP listeners, and relays for accepted TCP connections on its
//! behalf. Everything those sockets send and receive is multiplexed over the
//! one WebSocket.
//!
//! ## Protocol
//!
//! Clients send JSON text frames shaped `{action, socket, payload}`, where
//! `socket` is a client-chosen handle:
//!
//! * `create` - open a socket (`type` 1 is UDP, 2 is TCP; a TCP
//!   `tcpConnectionId` of 0 asks for a listener, any other id claims an
//!   accepted connection)
//! * `bind` - bind a local port
//! * `listen` - start accepting TCP connections
//! * `binary` - set the destination of the following binary frame
//!
//! A binary frame carries no header. It goes to the socket named by the text
//! frame immediately before it.
//!
//! The server answers with `{type, socket, payload}` events: `hostname`,
//! `listening`, `bindfail`, `clientconnected`, `clientdisconnected` and
//! `binary` (always followed by a binary frame with the data).
//!
//! ## Error Handling
//!
//! Out-of-protocol input is fatal to the session, which is closed with code
//! 1002 and a reason. A port that is already taken is reported with
//! `bindfail` and the session carries on. Other socket errors are logged only.
//!
//! ## Example
//!
//! ```rust,no_run
//! use relay_server::{create_server_with_config, ServerConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), relay_server::RelayError> {
//! let server = create_server_with_config(ServerConfig {
//!     bind_address: "0.0.0.0:8095".parse().unwrap(),
//!     ..Default::default()
//! });
//! server.start().await
//! # }
//! ```

pub use config::ServerConfig;
pub use connection::{ConnectionRegistry, GameClient};
pub use error::RelayError;
pub use messaging::{ClientCommand, ServerMessage, SocketHandle, TcpConnectionId};
pub use server::RelayServer;
pub use shutdown::ShutdownState;
pub use sockets::{GameSocket, SocketAction, SocketKind};
pub use utils::{create_server, create_server_with_config, host_name};

pub mod config;
pub mod connection;
pub mod error;
pub mod messaging;
pub mod server;
pub mod shutdown;
pub mod sockets;
pub mod utils;

#[cfg(test)]
mod tests;

//! Message handling for the relay wire protocol.
//!
//! This module provides the wire types exchanged with clients and the receive
//! state machine that ties binary frames to the command that announced them.

pub mod router;
pub mod types;

pub use router::ReceiveState;
pub use types::{AddressInfo, ClientCommand, CreateRequest, ServerMessage, SocketHandle, TcpConnectionId};

//! Client sessions and the state they share.
//!
//! Each WebSocket gets a [`GameClient`] and an outbound queue. Accepted TCP
//! connections live in the server-wide [`ConnectionRegistry`] until a session
//! claims them.

pub mod client;
pub mod outbound;
pub mod registry;

pub use client::{GameClient, CLOSE_GOING_AWAY, CLOSE_PROTOCOL_ERROR};
pub use outbound::{OutboundMessage, OutboundReceiver, OutboundSender, SocketOutbound};
pub use registry::{ClaimOutcome, ClaimedConnection, ConnectionRegistry, Delivery};

//! Outbound message queue for one client session.
//!
//! Every frame a session writes goes through a single unbounded channel that
//! is drained by the session's writer task. Socket adapters hold a
//! [`SocketOutbound`], a handle-tagged sender that acts as their non-owning
//! reference back to the session.

use crate::messaging::types::{event, ServerMessage, SocketHandle};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, trace};

/// Largest close reason RFC 6455 allows (125 byte control payload minus the code).
const MAX_CLOSE_REASON_LEN: usize = 123;

/// Sender side of a session's outbound queue.
pub type OutboundSender = mpsc::UnboundedSender<OutboundMessage>;

/// Receiver side of a session's outbound queue.
pub type OutboundReceiver = mpsc::UnboundedReceiver<OutboundMessage>;

/// One unit of work for the session writer.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// A single JSON text frame
    Typed(ServerMessage),

    /// A `binary` text frame immediately followed by a raw binary frame
    Binary { header: ServerMessage, data: Vec<u8> },

    /// Close the WebSocket; nothing is written after this
    Close { code: u16, reason: String },
}

impl OutboundMessage {
    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close { .. })
    }

    /// Converts the message into the WebSocket frames to write, in order.
    pub fn into_frames(self) -> Result<Vec<Message>, serde_json::Error> {
        Ok(match self {
            Self::Typed(message) => vec![Message::Text(serde_json::to_string(&message)?.into())],
            Self::Binary { header, data } => vec![
                Message::Text(serde_json::to_string(&header)?.into()),
                Message::Binary(data.into()),
            ],
            Self::Close { code, reason } => vec![Message::Close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: truncate_close_reason(&reason).into(),
            }))],
        })
    }
}

/// Cuts a close reason down to what fits in a close frame, on a char boundary.
pub fn truncate_close_reason(reason: &str) -> String {
    if reason.len() <= MAX_CLOSE_REASON_LEN {
        return reason.to_string();
    }
    let mut end = MAX_CLOSE_REASON_LEN;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}

/// Handle-tagged access to a session's outbound queue.
///
/// Sends fail silently (with a trace log) once the session is gone; adapter
/// tasks use the returned flag to stop early.
#[derive(Debug, Clone)]
pub struct SocketOutbound {
    handle: SocketHandle,
    sender: OutboundSender,
}

impl SocketOutbound {
    pub fn new(handle: SocketHandle, sender: OutboundSender) -> Self {
        Self { handle, sender }
    }

    pub fn handle(&self) -> SocketHandle {
        self.handle
    }

    /// Queues `{type, socket, payload}` as one text frame.
    pub fn send_typed_message(&self, kind: &str, payload: Value) -> bool {
        let message = ServerMessage::new(kind, Some(self.handle), payload);
        self.push(OutboundMessage::Typed(message))
    }

    /// Queues a `binary` text frame carrying `payload`, followed by `data`.
    pub fn send_binary_message(&self, data: Vec<u8>, payload: Value) -> bool {
        let header = ServerMessage::new(event::BINARY, Some(self.handle), payload);
        self.push(OutboundMessage::Binary { header, data })
    }

    fn push(&self, message: OutboundMessage) -> bool {
        match self.sender.send(message) {
            Ok(()) => true,
            Err(_) => {
                trace!("GameSocket #{}: session gone, dropping outbound message", self.handle);
                false
            }
        }
    }
}

/// Converts a message into frames, logging and skipping it if it cannot be serialized.
pub(crate) fn frames_or_log(message: OutboundMessage) -> Vec<Message> {
    match message.into_frames() {
        Ok(frames) => frames,
        Err(e) => {
            error!("Failed to serialize outbound message: {}", e);
            Vec::new()
        }
    }
}

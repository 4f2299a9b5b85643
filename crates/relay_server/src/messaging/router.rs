//! Inbound frame routing state.
//!
//! Binary WebSocket frames carry no header. Their recipient is whichever
//! socket the immediately preceding text command named, so every session
//! runs a two-phase receive state machine:
//!
//! ```text
//! AwaitingCommand --text(socket = H)--> AwaitingBinaryPayload(H)
//! AwaitingBinaryPayload(H) --text(socket = H')--> AwaitingBinaryPayload(H')
//! AwaitingBinaryPayload(H) --binary--> AwaitingCommand   (bytes go to H)
//! AwaitingCommand --binary--> protocol violation
//! ```

use super::types::SocketHandle;

/// Where the next inbound binary frame, if any, should be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiveState {
    /// No recipient named yet; a binary frame now is out of protocol
    #[default]
    AwaitingCommand,

    /// The last text command named this handle
    AwaitingBinaryPayload(SocketHandle),
}

impl ReceiveState {
    /// Records the handle named by a text command.
    pub fn on_command(&mut self, handle: SocketHandle) {
        *self = Self::AwaitingBinaryPayload(handle);
    }

    /// Consumes the pending recipient for an inbound binary frame.
    ///
    /// Returns `None` when no command announced the frame.
    pub fn take_binary_recipient(&mut self) -> Option<SocketHandle> {
        match std::mem::take(self) {
            Self::AwaitingBinaryPayload(handle) => Some(handle),
            Self::AwaitingCommand => None,
        }
    }

    /// The handle most recently named by a command, if still pending.
    pub fn pending_recipient(&self) -> Option<SocketHandle> {
        match self {
            Self::AwaitingBinaryPayload(handle) => Some(*handle),
            Self::AwaitingCommand => None,
        }
    }
}

//! Error types and handling for the relay server.
//!
//! This module defines the error types that can occur during relay operations,
//! separating session-fatal protocol violations from transport and OS failures.

/// Enumeration of possible relay errors.
///
/// A [`RelayError::ProtocolViolation`] raised while handling a client frame is
/// fatal to that client's whole session: the session answers it with a
/// WebSocket close frame carrying code 1002. The remaining variants describe
/// failures of the server itself (listener setup, handshakes, sockets).
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The remote client sent malformed or out-of-protocol input
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Network-related errors such as binding failures or handshake issues
    #[error("Network error: {0}")]
    Network(String),

    /// Raw I/O errors bubbling up from OS sockets
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Shorthand for building a protocol violation from any message.
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation(reason.into())
    }

    /// Returns true when this error must terminate the client session.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation(_))
    }

    /// The human-readable reason sent along with a protocol-error close frame.
    pub fn close_reason(&self) -> String {
        match self {
            Self::ProtocolViolation(reason) => reason.clone(),
            other => other.to_string(),
        }
    }
}

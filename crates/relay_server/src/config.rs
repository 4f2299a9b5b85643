//! Server configuration types and defaults.
//!
//! This module contains the relay configuration structure and default values
//! used to initialize the transport listener and tune the socket adapters.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Default size of the TCP-to-WebSocket write-coalescing buffer (10 MiB).
pub const DEFAULT_SEND_BUFFER_SIZE: usize = 10 * 1024 * 1024;

/// Default interval between flushes of the write-coalescing buffer.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 100;

/// Default receive buffer for a single UDP datagram (max IPv4 payload fits).
pub const DEFAULT_UDP_RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Configuration structure for the relay server.
///
/// Contains the WebSocket listen address and the tuning knobs used by the
/// socket adapters created on behalf of remote clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The socket address the WebSocket endpoint listens on
    pub bind_address: SocketAddr,

    /// Capacity of the per-connection write-coalescing buffer in bytes
    pub send_buffer_size: usize,

    /// How often buffered TCP data is flushed to the client, in milliseconds
    pub flush_interval_ms: u64,

    /// Whether to set TCP_NODELAY on relayed TCP connections
    pub tcp_nodelay: bool,

    /// Size of the buffer used to receive UDP datagrams
    pub udp_recv_buffer_size: usize,
}

impl ServerConfig {
    /// The flush interval as a [`Duration`].
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8095)),
            send_buffer_size: DEFAULT_SEND_BUFFER_SIZE,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            tcp_nodelay: true,
            udp_recv_buffer_size: DEFAULT_UDP_RECV_BUFFER_SIZE,
        }
    }
}

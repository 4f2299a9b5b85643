//! Utility functions and helper methods for the relay server.

use crate::{config::ServerConfig, server::RelayServer};
use sysinfo::System;

/// Name reported to clients when the host name cannot be read.
const FALLBACK_HOST_NAME: &str = "localhost";

/// Creates a relay server with default configuration.
///
/// # Example
///
/// ```rust
/// use relay_server::create_server;
///
/// let server = create_server();
/// assert_eq!(server.config().bind_address.port(), 8095);
/// ```
pub fn create_server() -> RelayServer {
    RelayServer::new(ServerConfig::default())
}

/// Creates a relay server with custom configuration.
///
/// # Example
///
/// ```rust
/// use relay_server::{create_server_with_config, ServerConfig};
///
/// let config = ServerConfig {
///     bind_address: "127.0.0.1:9000".parse().unwrap(),
///     flush_interval_ms: 50,
///     ..Default::default()
/// };
///
/// let server = create_server_with_config(config);
/// ```
pub fn create_server_with_config(config: ServerConfig) -> RelayServer {
    RelayServer::new(config)
}

/// The machine's host name as sent in the `hostname` greeting.
pub fn host_name() -> String {
    System::host_name()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_HOST_NAME.to_string())
}

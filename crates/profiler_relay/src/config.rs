//! Configuration management for the profiler relay.
//!
//! This module handles loading, validation, and conversion of the relay
//! configuration from TOML files and command-line arguments.

use crate::cli::CliArgs;
use relay_server::config::{DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_SEND_BUFFER_SIZE, DEFAULT_UDP_RECV_BUFFER_SIZE};
use relay_server::ServerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

fn default_bind_address() -> String {
    "0.0.0.0:8095".to_string()
}

fn default_send_buffer_size() -> usize {
    DEFAULT_SEND_BUFFER_SIZE
}

fn default_flush_interval_ms() -> u64 {
    DEFAULT_FLUSH_INTERVAL_MS
}

fn default_tcp_nodelay() -> bool {
    true
}

fn default_udp_recv_buffer_size() -> usize {
    DEFAULT_UDP_RECV_BUFFER_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Relay server settings
    #[serde(default)]
    pub server: ServerSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Relay server settings.
///
/// Controls where the WebSocket endpoint listens and how relayed sockets
/// are tuned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address of the WebSocket endpoint (e.g., "0.0.0.0:8095")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Write-coalescing buffer size for relayed TCP connections, in bytes
    #[serde(default = "default_send_buffer_size")]
    pub send_buffer_size: usize,
    /// Flush interval of the write-coalescing buffer, in milliseconds
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Whether relayed TCP connections disable Nagle's algorithm
    #[serde(default = "default_tcp_nodelay")]
    pub tcp_nodelay: bool,
    /// Receive buffer for one UDP datagram, in bytes
    #[serde(default = "default_udp_recv_buffer_size")]
    pub udp_recv_buffer_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            send_buffer_size: default_send_buffer_size(),
            flush_interval_ms: default_flush_interval_ms(),
            tcp_nodelay: default_tcp_nodelay(),
            udp_recv_buffer_size: default_udp_recv_buffer_size(),
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, a default configuration file is written
    /// there and the defaults are returned.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides on top of the file configuration.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(bind_address) = &args.bind_address {
            self.server.bind_address = bind_address.clone();
        }
        if let Some(log_level) = &args.log_level {
            self.logging.level = log_level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
    }

    /// Converts the application configuration to a relay server configuration.
    pub fn to_server_config(&self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        Ok(ServerConfig {
            bind_address: self.server.bind_address.parse()?,
            send_buffer_size: self.server.send_buffer_size,
            flush_interval_ms: self.server.flush_interval_ms,
            tcp_nodelay: self.server.tcp_nodelay,
            udp_recv_buffer_size: self.server.udp_recv_buffer_size,
        })
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", &self.server.bind_address));
        }

        if self.server.send_buffer_size == 0 {
            return Err("server.send_buffer_size must be greater than 0".to_string());
        }

        if self.server.flush_interval_ms == 0 {
            return Err("server.flush_interval_ms must be greater than 0".to_string());
        }

        if self.server.udp_recv_buffer_size == 0 {
            return Err("server.udp_recv_buffer_size must be greater than 0".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

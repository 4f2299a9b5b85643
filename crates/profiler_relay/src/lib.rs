//! # Profiler Relay - Main Entry Point
//!
//! Standalone server that lets browser-hosted profiling tools reach game
//! processes over UDP and TCP. This crate handles CLI parsing, configuration
//! loading, logging, and the application lifecycle; the relay itself lives
//! in `relay_server`.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration (listens on 0.0.0.0:8095)
//! profiler_relay
//!
//! # Specify custom configuration
//! profiler_relay --config relay.toml
//!
//! # Override specific settings
//! profiler_relay --bind 127.0.0.1:9000 --log-level debug
//!
//! # JSON logging
//! profiler_relay --json-logs
//! ```
//!
//! ## Configuration
//!
//! The server loads configuration from a TOML file (default: `config.toml`).
//! If the file doesn't exist, a default configuration will be created.
//!
//! ## Signal Handling
//!
//! SIGINT and SIGTERM (Ctrl+C on Windows) close every client session with
//! code 1001 and stop the server. A second signal exits immediately.

use tracing::error;

mod app;
mod cli;
mod config;
mod logging;
mod signals;

use app::Application;

pub use cli::CliArgs;
pub use config::{AppConfig, LoggingSettings, ServerSettings};

/// Runs the relay application.
///
/// # Exit Codes
///
/// * **0**: Successful execution and shutdown
/// * **1**: Error during startup, configuration, or runtime
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Load configuration to get logging settings
    let mut logging_config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default()
        .logging;
    if let Some(level) = &args.log_level {
        logging_config.level = level.clone();
    }

    if let Err(e) = logging::setup_logging(&logging_config, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

//! Main application logic and lifecycle management.
//!
//! This module contains the `Application` struct that loads configuration,
//! runs the relay server, and coordinates graceful shutdown.

use crate::{
    cli::CliArgs,
    config::AppConfig,
    logging::display_banner,
    signals::{setup_signal_handlers, setup_signal_handlers_silent},
};
use relay_server::{RelayServer, ShutdownState};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// How long the server gets to close its sessions after a shutdown signal.
const SERVER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(8);

/// Owns the relay server for the lifetime of the process.
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    /// Relay server instance
    server: Arc<RelayServer>,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// # Process
    ///
    /// 1. Load configuration from file (creating default if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate merged configuration
    /// 4. Display startup banner
    /// 5. Build the relay server
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        config.apply_cli_overrides(&args);

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        display_banner();

        let server = Arc::new(RelayServer::new(config.to_server_config()?));
        Ok(Self { config, server })
    }

    /// Runs the relay until a shutdown signal arrives or the server fails.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        self.log_configuration_summary();

        let shutdown_state = ShutdownState::new();
        let mut server_handle = {
            let server = self.server.clone();
            let shutdown_state = shutdown_state.clone();
            tokio::spawn(async move { server.start_with_shutdown_state(shutdown_state).await })
        };

        info!("✅ Profiler relay is now running!");
        info!("🎮 Ready to accept connections on {}", self.config.server.bind_address);
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        tokio::select! {
            finished = &mut server_handle => {
                return match finished {
                    Ok(Ok(())) => {
                        info!("✅ Server completed successfully");
                        Ok(())
                    }
                    Ok(Err(e)) => {
                        error!("❌ Server error: {}", e);
                        Err(e.into())
                    }
                    Err(e) => Err(e.into()),
                };
            }
            signal = setup_signal_handlers() => {
                signal?;
            }
        }

        // A second signal skips the graceful path.
        tokio::spawn(async move {
            if let Err(e) = setup_signal_handlers_silent().await {
                error!("Failed to set up merciless shutdown signal handler: {e}");
                return;
            }

            warn!("Shutdown handler received again! I'll make this quick.");
            std::process::exit(1);
        });

        info!("🛑 Shutdown signal received, closing client sessions...");
        shutdown_state.initiate_shutdown();
        self.server.shutdown();

        match tokio::time::timeout(SERVER_SHUTDOWN_TIMEOUT, server_handle).await {
            Ok(Ok(Ok(()))) => info!("✅ Server task completed gracefully"),
            Ok(Ok(Err(e))) => error!("❌ Server error during shutdown: {}", e),
            Ok(Err(e)) => error!("❌ Server task failed: {}", e),
            Err(_) => warn!("⏰ Server task did not complete within timeout, exiting anyway"),
        }

        info!("👋 Profiler relay shutdown complete");
        Ok(())
    }

    /// Logs the configuration summary at startup.
    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!(
            "  📦 TCP send buffer: {} bytes, flushed every {}ms",
            self.config.server.send_buffer_size, self.config.server.flush_interval_ms
        );
        info!("  ⚡ TCP_NODELAY: {}", self.config.server.tcp_nodelay);
        info!("  📨 UDP receive buffer: {} bytes", self.config.server.udp_recv_buffer_size);
    }
}

//! Signal handling for graceful server shutdown.
//!
//! Waits for SIGINT or SIGTERM on Unix (Ctrl+C on Windows) and flips a
//! [`ShutdownState`] so the relay can stop accepting clients and close the
//! ones it has.

use relay_server::ShutdownState;
use tokio::signal;
use tracing::info;

/// Waits for a termination signal and returns the initiated shutdown state.
pub async fn setup_signal_handlers() -> Result<ShutdownState, Box<dyn std::error::Error>> {
    let shutdown_state = setup_signal_handlers_silent().await?;
    info!("📡 Received shutdown signal - initiating graceful shutdown");
    Ok(shutdown_state)
}

/// Like [`setup_signal_handlers`], without logging the signal.
pub async fn setup_signal_handlers_silent() -> Result<ShutdownState, Box<dyn std::error::Error>> {
    let shutdown_state = ShutdownState::new();

    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => (),
            _ = sigterm.recv() => ()
        }
    }

    #[cfg(windows)]
    signal::ctrl_c().await?;

    shutdown_state.initiate_shutdown();
    Ok(shutdown_state)
}

//! Signal handling for graceful shutdown.
//!
//! SIGINT and SIGTERM (Ctrl+C on Windows) stop the replay. Partitions finish
//! the message in hand and report their statistics.

use tokio::signal;
use tracing::info;

/// Resolves once a termination signal is received.
pub async fn wait_for_shutdown_signal() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
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

    info!("📡 Received shutdown signal - initiating graceful shutdown");
    Ok(())
}

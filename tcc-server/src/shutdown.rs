//! Signal handling for graceful shutdown.

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;

/// Spawns a task that flips the returned channel to `true` on the first
/// shutdown signal. Both the consumer and the health server watch it.
pub fn spawn_signal_handler() -> std::io::Result<watch::Receiver<bool>> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
        }
        let _ = tx.send(true);
    });

    Ok(rx)
}

/// Resolves once `rx` turns true or its sender is gone.
pub async fn wait_for(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

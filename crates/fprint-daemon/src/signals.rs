//! Signal handling for orderly shutdown.

use anyhow::{Context, Result};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::info;

/// Install SIGTERM and SIGINT handlers.
///
/// The returned receiver yields once per received signal. The daemon treats
/// the first one like idle expiry.
pub fn setup_signal_handlers() -> Result<mpsc::Receiver<()>> {
    let (tx, rx) = mpsc::channel(1);

    for (kind, name) in [(SignalKind::terminate(), "SIGTERM"), (SignalKind::interrupt(), "SIGINT")] {
        let mut stream = signal(kind).with_context(|| format!("Failed to install {name} handler"))?;
        let tx = tx.clone();
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                info!(signal = name, "Received signal");
                if tx.send(()).await.is_err() {
                    break;
                }
            }
        });
    }

    Ok(rx)
}

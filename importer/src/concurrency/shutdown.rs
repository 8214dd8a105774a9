//! Shutdown signal of the import scheduler.
//!
//! A watch channel carrying no data: sending on [`ShutdownTx`] asks every holder of a
//! [`ShutdownRx`] to stop at its next waiting point.

use tokio::sync::watch;

pub type ShutdownTx = watch::Sender<()>;

pub type ShutdownRx = watch::Receiver<()>;

pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    watch::channel(())
}

/// Resolves once shutdown was requested on `shutdown_rx`.
///
/// Never resolves when the sender is dropped without requesting shutdown.
pub async fn shutdown_requested(shutdown_rx: &mut ShutdownRx) {
    if shutdown_rx.changed().await.is_err() {
        std::future::pending::<()>().await;
    }
}

//! Shutdown signaling for in-flight runs.
//!
//! Abstracts tokio's watch channels into a simple shutdown signal. The signal
//! carries no data payload: subscribers only care that shutdown was
//! requested, so poll waits can stop early instead of exhausting their
//! attempt budget.

use tokio::sync::watch;

/// Transmitter side of the shutdown channel.
///
/// Calling [`watch::Sender::send`] with `()` notifies every subscriber that
/// the current run should stop at its next suspension point.
pub type ShutdownTx = watch::Sender<()>;

/// Receiver side of the shutdown channel.
pub type ShutdownRx = watch::Receiver<()>;

/// Creates a new shutdown channel.
///
/// A watch channel is used instead of mpsc so that every receiver observes
/// the same signal simultaneously, and late subscribers created via
/// [`watch::Sender::subscribe`] still see it.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(());
    (tx, rx)
}

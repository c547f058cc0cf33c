//! Cross-thread wake-up signal.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::time::Duration;

/// Coalescing wake-up signal.
///
/// Any number of `notify` calls before a `wait` collapse into one wake-up.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    pub fn notify(&self) {
        // A full channel already holds a pending wake-up.
        let _ = self.tx.try_send(());
    }

    /// Block until notified or `timeout` elapses. Returns whether a notification arrived.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.rx.recv_timeout(timeout).is_ok()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

// Reload Coordinator - single-slot coalescing scan trigger

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Sending half of the reload signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ReloadCoordinator {
    tx: mpsc::Sender<()>,
}

/// Receiving half, owned by the single scan consumer loop
#[derive(Debug)]
pub struct ReloadReceiver {
    rx: mpsc::Receiver<()>,
}

/// Create a connected coordinator/receiver pair holding at most one pending signal
pub fn reload_channel() -> (ReloadCoordinator, ReloadReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (ReloadCoordinator { tx }, ReloadReceiver { rx })
}

impl ReloadCoordinator {
    /// Request a scan pass without blocking.
    ///
    /// Returns `false` when a pass is already pending (the request is coalesced)
    /// or the consumer is gone.
    pub fn trigger(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                tracing::debug!("Reload already pending, coalescing trigger");
                false
            }
            Err(TrySendError::Closed(())) => {
                tracing::debug!("Reload consumer stopped, dropping trigger");
                false
            }
        }
    }

    /// True while a signal is waiting to be consumed
    pub fn is_pending(&self) -> bool {
        !self.tx.is_closed() && self.tx.capacity() == 0
    }
}

impl ReloadReceiver {
    /// Wait for the next signal; `None` once every coordinator is dropped
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }

    /// Consume a pending signal without waiting
    pub fn try_recv(&mut self) -> Option<()> {
        self.rx.try_recv().ok()
    }
}

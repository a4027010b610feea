use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Ingestion reached end of input.
    Finished,
    /// External cancellation was requested.
    Cancelled,
}

/// Rendezvous between the ingestion loop and whoever is waiting on it.
///
/// Signaling is non-blocking: `notify_done` and `cancel` race for a single
/// slot and a slow or absent waiter never stalls ingestion. The one-shot is
/// inherently racy for late listeners, so completion is also recorded in a
/// durable flag, set before the notification is emitted; `wait` checks the
/// flag first and late callers can poll `is_done` directly.
pub struct IngestCoordinator {
    done: AtomicBool,
    tx: mpsc::Sender<IngestOutcome>,
    rx: Mutex<mpsc::Receiver<IngestOutcome>>,
}

impl IngestCoordinator {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            done: AtomicBool::new(false),
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Emitted by the ingestion loop exactly once, on end of all input.
    pub fn notify_done(&self) {
        self.done.store(true, Ordering::SeqCst);
        let _ = self.tx.try_send(IngestOutcome::Finished);
    }

    /// May be emitted at any time by an external interrupt source.
    pub fn cancel(&self) {
        let _ = self.tx.try_send(IngestOutcome::Cancelled);
    }

    /// Durable completion flag; survives a missed notification.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Wait for whichever outcome arrives first.
    pub async fn wait(&self) -> IngestOutcome {
        if self.is_done() {
            return IngestOutcome::Finished;
        }
        self.rx
            .lock()
            .await
            .recv()
            .await
            .unwrap_or(IngestOutcome::Cancelled)
    }
}

impl Default for IngestCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

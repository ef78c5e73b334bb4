//! Per-connection registry of in-flight operations, used by Abandon and
//! the Cancel extended operation to signal cooperative termination, and by
//! connection teardown to wait (bounded) for handlers to drain.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

struct PendingOperation {
    cancel: CancellationToken,
    done_rx: oneshot::Receiver<()>,
}

/// Held by a dispatched handler for the lifetime of its execution.
/// Dropping it closes the done-signal exactly once, regardless of whether
/// the handler finished normally or was cancelled.
pub struct PendingGuard {
    pub cancel: CancellationToken,
    done_tx: Option<oneshot::Sender<()>>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.done_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[derive(Default)]
pub struct AbandonRegistry {
    pending: Mutex<HashMap<i64, PendingOperation>>,
}

impl AbandonRegistry {
    pub fn new() -> AbandonRegistry {
        AbandonRegistry::default()
    }

    /// Register `message_id` as in flight. Re-registering an id that is
    /// already present cancels the prior entry before replacing it.
    pub fn register(&self, message_id: i64) -> PendingGuard {
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = oneshot::channel();
        let mut pending = self.pending.lock().expect("abandon registry mutex poisoned");
        if let Some(prev) = pending.insert(
            message_id,
            PendingOperation {
                cancel: cancel.clone(),
                done_rx,
            },
        ) {
            prev.cancel.cancel();
        }
        PendingGuard {
            cancel,
            done_tx: Some(done_tx),
        }
    }

    pub fn unregister(&self, message_id: i64) {
        self.pending.lock().expect("abandon registry mutex poisoned").remove(&message_id);
    }

    /// Trigger cancellation for `message_id` without producing a response;
    /// used by both Abandon (silent) and Cancel (acknowledged by the
    /// caller separately).
    pub fn handle(&self, message_id: i64) -> bool {
        let pending = self.pending.lock().expect("abandon registry mutex poisoned");
        match pending.get(&message_id) {
            Some(op) => {
                op.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("abandon registry mutex poisoned").len()
    }

    /// Cancel every pending operation and wait, up to `grace`, for them to
    /// report completion via their done-signal. Used on connection
    /// teardown; operations that don't drain in time are simply abandoned.
    pub async fn cancel_all_and_drain(&self, grace: Duration) {
        let done_rxs: Vec<_> = {
            let mut pending = self.pending.lock().expect("abandon registry mutex poisoned");
            for op in pending.values() {
                op.cancel.cancel();
            }
            pending.drain().map(|(_, op)| op.done_rx).collect()
        };
        let wait_all = futures_util::future::join_all(done_rxs);
        let _ = tokio::time::timeout(grace, wait_all).await;
    }
}

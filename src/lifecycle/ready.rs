//! Single-assignment readiness signal.
//!
//! [`ready_signal`] returns a notifier that may be triggered any number of
//! times from any task, and exactly one waiter. Only the first notification
//! is delivered; later ones are no-ops and never block, even when the waiter
//! has already been dropped.

use std::sync::{Mutex, PoisonError};

use tokio::sync::oneshot;

/// Sending half, shared by whoever observes readiness.
#[derive(Debug)]
pub struct ReadyNotifier {
    tx: Mutex<Option<oneshot::Sender<()>>>,
}

/// Receiving half, owned by the startup sequence.
#[derive(Debug)]
pub struct ReadyWaiter {
    rx: oneshot::Receiver<()>,
}

pub fn ready_signal() -> (ReadyNotifier, ReadyWaiter) {
    let (tx, rx) = oneshot::channel();
    (
        ReadyNotifier {
            tx: Mutex::new(Some(tx)),
        },
        ReadyWaiter { rx },
    )
}

impl ReadyNotifier {
    /// Fire the signal. Returns `true` only for the first call.
    pub fn notify(&self) -> bool {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match tx {
            Some(tx) => {
                if tx.send(()).is_err() {
                    tracing::debug!("Ready signal fired with no waiter");
                }
                true
            }
            None => false,
        }
    }

    pub fn has_fired(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl ReadyWaiter {
    /// Resolve once the signal fires. Fails if the notifier is dropped first.
    pub async fn wait(self) -> Result<(), oneshot::error::RecvError> {
        self.rx.await
    }
}

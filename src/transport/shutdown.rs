//! Cooperative shutdown for the listener loops.

use tokio::sync::{oneshot, watch};

/// Create a linked trigger/signal pair.
pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

/// Sets the shutdown flag observed by every [`ShutdownSignal`].
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read side of the shutdown flag, cloned into every task.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is triggered or the trigger is dropped.
    pub async fn triggered(&mut self) {
        // An error means the trigger is gone, which also ends the server.
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}

/// Completion signal a listener loop resolves when it has stopped.
#[derive(Debug)]
pub struct Completion(oneshot::Sender<()>);

impl Completion {
    pub fn pair() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    pub fn complete(self) {
        let _ = self.0.send(());
    }
}

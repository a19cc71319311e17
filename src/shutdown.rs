//! The single cancellation primitive of a run. One [`ShutdownSender`] is
//! held by the coordinator; every filter task observes a clone of the same
//! [`ShutdownSignal`]. Raising it is idempotent.

use tokio::sync::broadcast;

pub type FilterError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Proof that a filter task observed the shutdown signal and exited its
/// loop cleanly.
#[derive(Debug)]
pub struct CleanExit(());

pub struct ShutdownSignal {
    tx: broadcast::Sender<()>,
    rx: broadcast::Receiver<()>,
}

impl Clone for ShutdownSignal {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownSignal {
    pub fn new() -> (ShutdownSender, ShutdownSignal) {
        let (tx, rx) = broadcast::channel(1);
        (ShutdownSender(tx.clone()), ShutdownSignal { tx, rx })
    }

    pub async fn recv(&mut self) -> Result<CleanExit, FilterError> {
        let _ = self.rx.recv().await;
        Ok(CleanExit(()))
    }
}

pub struct ShutdownSender(broadcast::Sender<()>);

impl ShutdownSender {
    pub fn send_signal(&self) {
        let _ = self.0.send(());
    }
}

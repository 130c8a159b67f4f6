//! Shutdown coordination for the proxy.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinHandle};

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// How a task ended after shutdown was triggered.
#[derive(Debug)]
pub enum Drained<T> {
    Finished(T),
    Panicked(JoinError),
    /// Still running when the grace period ran out; it has been aborted.
    TimedOut,
}

/// Wait up to `grace` for `task` to finish, aborting it afterwards.
pub async fn drain<T>(task: &mut JoinHandle<T>, grace: Duration) -> Drained<T> {
    match tokio::time::timeout(grace, &mut *task).await {
        Ok(Ok(out)) => Drained::Finished(out),
        Ok(Err(e)) => Drained::Panicked(e),
        Err(_) => {
            task.abort();
            Drained::TimedOut
        }
    }
}

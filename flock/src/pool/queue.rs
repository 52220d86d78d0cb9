use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender};

use super::Runnable;

/// Holds the actors that have entries ready for processing.
///
/// Actors are pushed when they become ready and pulled by idle workers. An
/// actor's `scheduled` flag keeps it in here at most once.
pub(crate) struct ReadyQueue {
    sender: Sender<Arc<dyn Runnable>>,
    receiver: Receiver<Arc<dyn Runnable>>,
}

impl fmt::Debug for ReadyQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadyQueue").field("len", &self.len()).finish()
    }
}

impl ReadyQueue {
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self { sender, receiver }
    }

    pub fn push(&self, actor: Arc<dyn Runnable>) {
        // Both halves live in `self`, so the channel cannot be disconnected here.
        let _ = self.sender.send(actor);
    }

    /// Waits up to `timeout` for a ready actor.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Arc<dyn Runnable>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(actor) => Some(actor),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Removes every queued actor.
    pub fn drain(&self) -> Vec<Arc<dyn Runnable>> {
        self.receiver.drain().collect()
    }

    /// Snapshot; may change by the time it is read.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }
}

use std::fmt;

use crossbeam_queue::SegQueue;

use crate::envelope::Envelope;

/// FIFO queue of pending entries for one actor.
///
/// Any thread may push. Popping is only done by the worker currently holding
/// the actor's turn, so entries leave in exactly the order they arrived.
pub(crate) struct Mailbox<M, R> {
    queue: SegQueue<Envelope<M, R>>,
}

impl<M, R> Mailbox<M, R> {
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
        }
    }

    pub fn push(&self, envelope: Envelope<M, R>) {
        self.queue.push(envelope);
    }

    pub fn pop(&self) -> Option<Envelope<M, R>> {
        self.queue.pop()
    }

    /// Snapshot; may change by the time it is read.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Removes every queued entry, oldest first.
    pub fn drain(&self) -> Vec<Envelope<M, R>> {
        let mut drained = Vec::with_capacity(self.queue.len());
        while let Some(envelope) = self.queue.pop() {
            drained.push(envelope);
        }
        drained
    }
}

impl<M, R> fmt::Debug for Mailbox<M, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox").field("len", &self.len()).finish()
    }
}

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, error, trace};

use super::{Gate, PoolShared, Runnable, Step};
use crate::error::{GroupError, HandlerFailure};
use crate::logging;

/// Status codes for worker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Waiting for a ready actor
    Idle = 0,

    /// Running an actor's entries
    Processing = 1,

    /// The thread has left its loop
    Exited = 2,
}

impl WorkerStatus {
    fn from_usize(value: usize) -> Self {
        match value {
            0 => WorkerStatus::Idle,
            1 => WorkerStatus::Processing,
            _ => WorkerStatus::Exited,
        }
    }
}

/// Shared view of a worker's status, readable by dump.
#[derive(Clone)]
pub(crate) struct StatusCell(Arc<AtomicUsize>);

impl StatusCell {
    fn new() -> Self {
        Self(Arc::new(AtomicUsize::new(WorkerStatus::Idle as usize)))
    }

    fn set(&self, status: WorkerStatus) {
        self.0.store(status as usize, Ordering::Relaxed);
    }

    pub fn get(&self) -> WorkerStatus {
        WorkerStatus::from_usize(self.0.load(Ordering::Relaxed))
    }
}

/// One thread of the pool.
///
/// ## Core Algorithm
/// 1. Pull a ready actor from the shared ready queue
/// 2. Run up to `budget` of its entries, one at a time
/// 3. Release the actor and hand it back to the queue if entries remain
/// 4. Exit once the pool is killed, or stopped with nothing outstanding
pub(crate) struct Worker {
    name: String,
    shared: Arc<PoolShared>,
    status: StatusCell,
    budget: usize,
    idle_poll: Duration,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("budget", &self.budget)
            .field("status", &self.status.get())
            .finish()
    }
}

impl Worker {
    pub fn new(name: String, shared: Arc<PoolShared>, budget: usize, idle_poll: Duration) -> Self {
        Self {
            name,
            shared,
            status: StatusCell::new(),
            budget,
            idle_poll,
        }
    }

    pub fn status(&self) -> StatusCell {
        self.status.clone()
    }

    /// Starts the worker on its own detached OS thread, logging through the
    /// caller's dispatcher. The thread exits on its own once the pool lets it.
    pub fn spawn(self) -> Result<(), GroupError> {
        let dispatch = logging::current_dispatch();
        let name = self.name.clone();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || tracing::dispatcher::with_default(&dispatch, || self.run_loop()))
            .with_context(|| format!("failed to spawn worker thread {name}"))?;
        Ok(())
    }

    fn run_loop(&self) {
        debug!(worker = %self.name, "worker started");

        while !self.shared.is_killed() {
            match self.shared.ready.recv_timeout(self.idle_poll) {
                Some(actor) => {
                    self.status.set(WorkerStatus::Processing);
                    self.run_turn(actor);
                    self.status.set(WorkerStatus::Idle);
                }
                None => {
                    if self.shared.should_exit() {
                        break;
                    }
                }
            }
        }

        self.status.set(WorkerStatus::Exited);
        debug!(worker = %self.name, "worker exited");
    }

    /// Runs one turn of `actor`. The caller holds the actor's turn until `release`.
    fn run_turn(&self, actor: Arc<dyn Runnable>) {
        let span = crate::actor_span!(actor.label());
        let _enter = span.enter();
        let gate = Gate::new(&self.shared);
        let mut processed = 0;

        while processed < self.budget {
            // The claimed entry's ticket settles the accounting even if this unwinds.
            let step = panic::catch_unwind(AssertUnwindSafe(|| actor.run_next(&gate)))
                .unwrap_or_else(|payload| {
                    let failure = HandlerFailure::from_panic(payload);
                    error!(worker = %self.name, %failure, "entry panicked outside its handler");
                    Step::Ran
                });

            match step {
                Step::Ran => processed += 1,
                Step::Skipped => {}
                Step::Empty | Step::Refused => break,
            }
        }

        trace!(worker = %self.name, processed, "turn finished");

        if actor.release() {
            self.shared.requeue(actor);
        }
    }
}

//! # Worker Pool
//!
//! A fixed set of OS threads that execute ready actors' mailbox entries.
//!
//! ## Key Concepts
//! - Ready queue: actors with queued entries that no worker currently holds
//! - Turn: a worker holding one actor runs up to `max_messages_per_turn` entries
//! - Outstanding: entries admitted and not yet run, skipped or discarded
//!
//! ## Lifecycle
//! `Running` admits new entries. `stop` moves to `Stopped`: nothing new is
//! admitted and what was admitted drains. `kill` moves to `Killed`: queued
//! entries are cancelled and only the invocations already in flight finish.
//! Admission, claiming an entry to run, and state changes are serialized by the
//! state lock, so every entry is either admitted before the change or rejected
//! after it, and either started before `kill` or cancelled by it.

mod queue;
mod worker;

pub use worker::WorkerStatus;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, Weak};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::config::GroupConfig;
use crate::error::GroupError;
use crate::log_pool;
use queue::ReadyQueue;
use worker::{StatusCell, Worker};

/// Outcome of asking an actor for its next entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// An entry was handed to the handler and its future resolved
    Ran,
    /// The entry's future was already done (cancelled), so it was dropped unrun
    Skipped,
    /// The mailbox was empty
    Empty,
    /// The pool is killed; the mailbox is left to `kill`
    Refused,
}

/// The pool's type-erased view of an actor.
///
/// `run_next` is only called by the worker holding the actor's turn. `discard`
/// is only called by `kill`, after the pool stopped handing out entries.
pub(crate) trait Runnable: Send + Sync + 'static {
    fn label(&self) -> String;

    /// Claims the oldest entry through `gate` and runs it.
    fn run_next(&self, gate: &Gate<'_>) -> Step;

    /// Cancels every queued entry and returns how many were removed.
    fn discard(&self) -> usize;

    /// Claims the actor's turn. Returns false if it is already ready or running.
    fn try_schedule(&self) -> bool;

    /// Gives up the actor's turn. Returns true if entries arrived in the meantime
    /// and the turn was claimed again, in which case the caller must requeue it.
    fn release(&self) -> bool;
}

/// Result of [`Gate::claim`].
pub(crate) enum Claim<'a, T> {
    /// An entry to run. Hold `admit` until the handler is entered and keep
    /// `ticket` until the entry's outcome is settled.
    Taken {
        entry: T,
        admit: Admit<'a>,
        ticket: Ticket<'a>,
    },
    Empty,
    Killed,
}

/// Holds off `kill` while an entry moves from the mailbox into its handler.
pub(crate) struct Admit<'a> {
    _state: RwLockReadGuard<'a, PoolState>,
}

/// One claimed entry. Dropping it marks the entry finished, also on unwind.
pub(crate) struct Ticket<'a> {
    shared: &'a PoolShared,
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.shared.finish(1);
    }
}

/// The only way a runnable takes entries out of its mailbox.
pub(crate) struct Gate<'a> {
    shared: &'a PoolShared,
}

impl<'a> Gate<'a> {
    pub(crate) fn new(shared: &'a PoolShared) -> Self {
        Self { shared }
    }

    /// Pops an entry with `pop` unless the pool is killed.
    ///
    /// The state lock is held across the pop and handed back in [`Admit`], so
    /// `kill` either sees the entry started or finds it still in the mailbox.
    pub(crate) fn claim<T>(&self, pop: impl FnOnce() -> Option<T>) -> Claim<'a, T> {
        let state = self.shared.read_state();
        if *state == PoolState::Killed {
            return Claim::Killed;
        }
        match pop() {
            Some(entry) => {
                self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
                Claim::Taken {
                    entry,
                    admit: Admit { _state: state },
                    ticket: Ticket { shared: self.shared },
                }
            }
            None => Claim::Empty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Running,
    Stopped,
    Killed,
}

/// State shared by the pool handle and its workers.
pub(crate) struct PoolShared {
    state: RwLock<PoolState>,
    ready: ReadyQueue,
    /// Entries admitted and not yet finished
    outstanding: AtomicUsize,
    /// Entries claimed from a mailbox and not yet settled
    in_flight: AtomicUsize,
    /// Every actor submitted to this pool, so `kill` can reach their mailboxes
    actors: Mutex<Vec<Weak<dyn Runnable>>>,
    drained_lock: Mutex<()>,
    drained: Condvar,
    drained_notify: Notify,
}

impl PoolShared {
    fn new() -> Self {
        Self {
            state: RwLock::new(PoolState::Running),
            ready: ReadyQueue::new(),
            outstanding: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            actors: Mutex::new(Vec::new()),
            drained_lock: Mutex::new(()),
            drained: Condvar::new(),
            drained_notify: Notify::new(),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, PoolState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> PoolState {
        *self.read_state()
    }

    fn actors(&self) -> MutexGuard<'_, Vec<Weak<dyn Runnable>>> {
        self.actors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_killed(&self) -> bool {
        self.state() == PoolState::Killed
    }

    fn is_done(&self) -> bool {
        self.outstanding.load(Ordering::SeqCst) == 0
    }

    fn should_exit(&self) -> bool {
        match self.state() {
            PoolState::Running => false,
            PoolState::Stopped => self.is_done(),
            PoolState::Killed => true,
        }
    }

    /// Marks `count` outstanding entries as finished and wakes joiners on drain.
    fn finish(&self, count: usize) {
        if count == 0 {
            return;
        }
        if self.outstanding.fetch_sub(count, Ordering::SeqCst) == count {
            // Take the lock so a joiner between its check and its wait cannot miss this.
            let _guard = self.drained_lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.drained.notify_all();
            self.drained_notify.notify_waiters();
        }
    }

    /// Hands an actor whose turn was re-claimed back to the ready queue.
    ///
    /// After `kill` the actor is dropped instead; its mailbox belongs to `kill`.
    fn requeue(&self, actor: Arc<dyn Runnable>) {
        let state = self.read_state();
        if *state != PoolState::Killed {
            self.ready.push(actor);
        }
    }
}

struct WorkerHandle {
    name: String,
    status: StatusCell,
}

/// Point-in-time view of the pool for diagnostics.
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    pub state: PoolState,
    pub pool_size: usize,
    pub workers: Vec<(String, WorkerStatus)>,
    /// Actors waiting for a worker
    pub ready: usize,
    /// Entries admitted and not yet finished, in flight included
    pub outstanding: usize,
    /// Entries taken from a mailbox whose outcome is not settled yet
    pub in_flight: usize,
}

/// Bounded pool of worker threads executing ready actors.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Vec<WorkerHandle>,
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("pool_size", &self.workers.len())
            .field("state", &self.shared.state())
            .field("outstanding", &self.shared.outstanding.load(Ordering::Relaxed))
            .finish()
    }
}

impl ThreadPool {
    /// Starts `config.pool_size` worker threads.
    pub fn new(config: &GroupConfig) -> Result<Self, GroupError> {
        let shared = Arc::new(PoolShared::new());
        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(config.pool_size),
        };

        for id in 0..config.pool_size {
            let name = format!("{}-{}", config.thread_name_prefix, id);
            let worker = Worker::new(
                name.clone(),
                pool.shared.clone(),
                config.max_messages_per_turn,
                config.idle_poll,
            );
            let status = worker.status();
            match worker.spawn() {
                Ok(()) => pool.workers.push(WorkerHandle { name, status }),
                Err(err) => {
                    // Let the workers that did start exit.
                    pool.kill();
                    return Err(err);
                }
            }
        }

        log_pool!("started", pool_size = config.pool_size);
        Ok(pool)
    }

    /// Makes `actor` reachable by [`kill`](Self::kill) for as long as it is alive.
    pub(crate) fn register(&self, actor: Weak<dyn Runnable>) {
        let mut actors = self.shared.actors();
        if actors.len() >= 64 && actors.len().is_power_of_two() {
            actors.retain(|actor| actor.strong_count() > 0);
        }
        actors.push(actor);
    }

    /// Admits one mailbox entry.
    ///
    /// `push` appends the entry to the actor's mailbox and runs only if the pool
    /// is still running; the actor is then marked ready unless it already is
    /// ready or running. Returns whether the entry was admitted.
    pub(crate) fn submit(&self, actor: Arc<dyn Runnable>, push: impl FnOnce()) -> bool {
        let state = self.shared.read_state();
        if *state != PoolState::Running {
            return false;
        }
        self.shared.outstanding.fetch_add(1, Ordering::SeqCst);
        push();
        if actor.try_schedule() {
            self.shared.ready.push(actor);
        }
        true
    }

    /// Stops admitting entries; everything already admitted drains.
    pub fn stop(&self) {
        let mut state = self.shared.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state == PoolState::Running {
            *state = PoolState::Stopped;
            log_pool!("stopped", outstanding = self.shared.outstanding.load(Ordering::SeqCst));
        }
    }

    /// Stops admitting entries and cancels every entry not already executing.
    ///
    /// When this returns, every entry is either cancelled or was entered by
    /// its handler before the call; no handler starts afterwards.
    pub fn kill(&self) {
        {
            let mut state = self.shared.state.write().unwrap_or_else(PoisonError::into_inner);
            if *state == PoolState::Killed {
                return;
            }
            *state = PoolState::Killed;
        }

        // Gate refuses every claim from here on, so nothing else pops a mailbox.
        drop(self.shared.ready.drain());
        let actors: Vec<Arc<dyn Runnable>> = self.shared.actors().iter().filter_map(Weak::upgrade).collect();

        let mut discarded = 0;
        for actor in &actors {
            let count = actor.discard();
            discarded += count;
            self.shared.finish(count);
        }
        log_pool!("killed", discarded, in_flight = self.shared.in_flight.load(Ordering::SeqCst));
    }

    pub fn state(&self) -> PoolState {
        self.shared.state()
    }

    /// True once no new work will be admitted.
    pub fn is_stopped(&self) -> bool {
        self.state() != PoolState::Running
    }

    /// True when no entry is queued or executing.
    pub fn is_done(&self) -> bool {
        self.shared.is_done()
    }

    pub fn pool_size(&self) -> usize {
        self.workers.len()
    }

    /// Blocks until [`is_done`](Self::is_done) or `timeout` elapses. `None` waits forever.
    ///
    /// Must not be called from a handler of the same pool with entries of its own
    /// outstanding, since that handler counts as outstanding until it returns.
    pub fn join(&self, timeout: Option<Duration>) -> Result<(), GroupError> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t).map(|at| (t, at)));

        let mut guard = self.shared.drained_lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if self.is_done() {
                return Ok(());
            }
            guard = match deadline {
                None => self
                    .shared
                    .drained
                    .wait(guard)
                    .unwrap_or_else(PoisonError::into_inner),
                Some((timeout, at)) => {
                    let now = Instant::now();
                    if now >= at {
                        return Err(GroupError::JoinTimeout(timeout));
                    }
                    let (guard, _) = self
                        .shared
                        .drained
                        .wait_timeout(guard, at - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    guard
                }
            };
        }
    }

    /// Suspends the calling task until the pool is done or `timeout` elapses.
    pub async fn join_async(&self, timeout: Option<Duration>) -> Result<(), GroupError> {
        let drained = async {
            loop {
                let notified = self.shared.drained_notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.is_done() {
                    return;
                }
                notified.await;
            }
        };

        match timeout {
            None => {
                drained.await;
                Ok(())
            }
            Some(timeout) => tokio::time::timeout(timeout, drained)
                .await
                .map_err(|_| GroupError::JoinTimeout(timeout)),
        }
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            state: self.state(),
            pool_size: self.pool_size(),
            workers: self
                .workers
                .iter()
                .map(|worker| (worker.name.clone(), worker.status.get()))
                .collect(),
            ready: self.shared.ready.len(),
            outstanding: self.shared.outstanding.load(Ordering::SeqCst),
            in_flight: self.shared.in_flight.load(Ordering::SeqCst),
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Workers drain what was admitted and then exit.
        self.stop();
    }
}

//! # Actor Futures
//!
//! A single-assignment result cell shared between the sender of a message and the
//! worker that executes it. The sender observes or cancels; only the runtime resolves.
//!
//! Waiting comes in two forms with the same contract:
//! - [`ActorFuture::get`] blocks the calling thread on a condvar
//! - [`ActorFuture::wait`] suspends the calling task on a `tokio::sync::Notify`

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::warn;

use crate::error::{FutureError, HandlerFailure};

/// Observable state of an [`ActorFuture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

type Callback = Box<dyn FnOnce() + Send + 'static>;

enum Slot<T> {
    Pending,
    Completed(T),
    Failed(FutureError),
    Cancelled,
}

impl<T: Clone> Slot<T> {
    fn result(&self) -> Option<Result<T, FutureError>> {
        match self {
            Slot::Pending => None,
            Slot::Completed(value) => Some(Ok(value.clone())),
            Slot::Failed(error) => Some(Err(error.clone())),
            Slot::Cancelled => Some(Err(FutureError::Cancelled)),
        }
    }
}

struct Cell<T> {
    slot: Slot<T>,
    callbacks: Vec<Callback>,
}

struct Shared<T> {
    cell: Mutex<Cell<T>>,
    /// Wakes threads blocked in `get`
    resolved: Condvar,
    /// Wakes tasks suspended in `wait`
    notify: Notify,
    /// Debug rendering of the message that produced this future
    message: Box<str>,
}

/// Handle to the eventual result of a message sent to an actor.
///
/// Cloning the handle shares the same cell. State transitions are one-shot:
/// the first of complete/fail/cancel wins and later attempts are ignored.
pub struct ActorFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ActorFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> ActorFuture<T> {
    pub(crate) fn new(message: impl Into<Box<str>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                cell: Mutex::new(Cell {
                    slot: Slot::Pending,
                    callbacks: Vec::new(),
                }),
                resolved: Condvar::new(),
                notify: Notify::new(),
                message: message.into(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Cell<T>> {
        self.shared.cell.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> FutureState {
        match self.lock().slot {
            Slot::Pending => FutureState::Pending,
            Slot::Completed(_) => FutureState::Completed,
            Slot::Failed(_) => FutureState::Failed,
            Slot::Cancelled => FutureState::Cancelled,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == FutureState::Pending
    }

    /// True once the future is completed, failed or cancelled.
    pub fn is_done(&self) -> bool {
        !self.is_pending()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == FutureState::Cancelled
    }

    /// Debug text of the originating message.
    pub fn message(&self) -> &str {
        &self.shared.message
    }

    /// Cancels the future if it is still pending.
    ///
    /// A queued entry whose future is cancelled is never handed to its actor.
    /// Cancelling while the handler is running does not interrupt it, the
    /// handler's result is simply discarded. Returns whether cancellation took effect.
    pub fn cancel(&self) -> bool {
        self.resolve(Slot::Cancelled)
    }

    pub(crate) fn complete(&self, value: T) -> bool {
        self.resolve(Slot::Completed(value))
    }

    pub(crate) fn fail(&self, failure: HandlerFailure) -> bool {
        self.resolve(Slot::Failed(FutureError::Handler(failure)))
    }

    /// Fails the future without running anything, used when a send is not admitted.
    pub(crate) fn reject(&self, error: FutureError) -> bool {
        self.resolve(Slot::Failed(error))
    }

    /// Registers `callback` to run once the future leaves the pending state.
    ///
    /// Runs immediately on the calling thread if the future is already done,
    /// otherwise on the thread that resolves it. Keep callbacks short. A panic
    /// in a callback run on resolve is logged and does not reach the resolver.
    pub fn on_done<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut cell = self.lock();
            if matches!(cell.slot, Slot::Pending) {
                cell.callbacks.push(Box::new(callback));
                return;
            }
        }
        callback();
    }

    fn resolve(&self, slot: Slot<T>) -> bool {
        let callbacks = {
            let mut cell = self.lock();
            if !matches!(cell.slot, Slot::Pending) {
                return false;
            }
            cell.slot = slot;
            std::mem::take(&mut cell.callbacks)
        };

        self.shared.resolved.notify_all();
        self.shared.notify.notify_waiters();
        for callback in callbacks {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
                let failure = HandlerFailure::from_panic(payload);
                warn!(message = %self.shared.message, %failure, "on_done callback panicked");
            }
        }
        true
    }
}

impl<T: Clone> ActorFuture<T> {
    /// Returns the result without waiting, or `None` while pending.
    pub fn try_get(&self) -> Option<Result<T, FutureError>> {
        self.lock().slot.result()
    }

    /// Blocks until the future is resolved or `timeout` elapses.
    ///
    /// `None` waits forever. Repeated calls return the same outcome.
    pub fn get(&self, timeout: Option<Duration>) -> Result<T, FutureError> {
        // A timeout too large to represent as an instant is treated as no timeout.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t).map(|at| (t, at)));

        let mut cell = self.lock();
        loop {
            if let Some(result) = cell.slot.result() {
                return result;
            }
            cell = match deadline {
                None => self
                    .shared
                    .resolved
                    .wait(cell)
                    .unwrap_or_else(PoisonError::into_inner),
                Some((timeout, at)) => {
                    let now = Instant::now();
                    if now >= at {
                        return Err(FutureError::Timeout(timeout));
                    }
                    let (cell, _) = self
                        .shared
                        .resolved
                        .wait_timeout(cell, at - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    cell
                }
            };
        }
    }

    /// Suspends the calling task until the future is resolved or `timeout` elapses.
    pub async fn wait(&self, timeout: Option<Duration>) -> Result<T, FutureError> {
        let resolved = async {
            loop {
                let notified = self.shared.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                let result = self.try_get();
                if let Some(result) = result {
                    return result;
                }
                notified.await;
            }
        };

        match timeout {
            None => resolved.await,
            Some(timeout) => tokio::time::timeout(timeout, resolved)
                .await
                .unwrap_or(Err(FutureError::Timeout(timeout))),
        }
    }
}

impl<T> fmt::Debug for ActorFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorFuture")
            .field("state", &self.state())
            .field("message", &self.message())
            .finish()
    }
}

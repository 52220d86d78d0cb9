//! # Actors
//!
//! An actor is a mailbox plus a handler, bound to an [`ActorGroup`]. Messages are
//! handled one at a time in the order they were sent; the pool never runs two
//! entries of the same actor at once, so the handler's own state needs no locking.

use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{self, AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tracing::trace;
use uuid::Uuid;

use crate::envelope::{self, Envelope};
use crate::error::{BoxError, FutureError, HandlerFailure};
use crate::future::ActorFuture;
use crate::group::ActorGroup;
use crate::mailbox::Mailbox;
use crate::pool::{Claim, Gate, Runnable, Step};
use crate::scheduler::Work;

/// Unique identity of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActorId(Uuid);

impl ActorId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// What a message means to an actor.
///
/// `receive` is invoked with exactly one message at a time. Returning `Err`, or
/// panicking, fails that message's future; the actor keeps processing later ones.
pub trait Handler: Send + 'static {
    type Msg: fmt::Debug + Send + 'static;
    type Output: Clone + Send + 'static;

    fn receive(&mut self, msg: Self::Msg) -> Result<Self::Output, BoxError>;
}

/// A [`Handler`] backed by a closure. Built by [`Actor::from_fn`].
pub struct FnHandler<F, M, R> {
    f: F,
    _marker: PhantomData<fn(M) -> R>,
}

impl<F, M, R> Handler for FnHandler<F, M, R>
where
    F: FnMut(M) -> Result<R, BoxError> + Send + 'static,
    M: fmt::Debug + Send + 'static,
    R: Clone + Send + 'static,
{
    type Msg = M;
    type Output = R;

    fn receive(&mut self, msg: M) -> Result<R, BoxError> {
        (self.f)(msg)
    }
}

struct ActorCell<H: Handler> {
    id: ActorId,
    name: Option<String>,
    group: ActorGroup,
    mailbox: Mailbox<H::Msg, H::Output>,
    /// Set while the actor sits in the ready queue or a worker holds its turn
    scheduled: AtomicBool,
    handler: Mutex<H>,
}

impl<H: Handler> ActorCell<H> {
    /// Appends an entry and marks the actor ready, or rejects it if the group is stopped.
    fn enqueue(self: &Arc<Self>, envelope: Envelope<H::Msg, H::Output>) {
        let future = envelope.future.clone();
        let runnable: Arc<dyn Runnable> = self.clone();
        let admitted = self.group.submit(runnable, || self.mailbox.push(envelope));
        if !admitted {
            future.reject(FutureError::Stopped);
        }
    }
}

impl<H: Handler> Runnable for ActorCell<H> {
    fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{name} ({})", self.id),
            None => self.id.to_string(),
        }
    }

    fn run_next(&self, gate: &Gate<'_>) -> Step {
        let (Envelope { payload, future }, admit, ticket) = match gate.claim(|| self.mailbox.pop()) {
            Claim::Taken { entry, admit, ticket } => (entry, admit, ticket),
            Claim::Empty => return Step::Empty,
            Claim::Killed => return Step::Refused,
        };
        if !future.is_pending() {
            trace!(actor = %self.id, message = future.message(), "skipping resolved entry");
            return Step::Skipped;
        }

        let outcome = {
            let mut handler = self.handler.lock().unwrap_or_else(PoisonError::into_inner);
            panic::catch_unwind(AssertUnwindSafe(|| {
                // From here on the entry counts as started and `kill` may proceed.
                drop(admit);
                handler.receive(payload)
            }))
        };

        match outcome {
            Ok(Ok(value)) => future.complete(value),
            Ok(Err(error)) => future.fail(HandlerFailure::new(error)),
            Err(panic) => future.fail(HandlerFailure::from_panic(panic)),
        };
        // Settled only after the future resolved, so a drained pool has no pending results.
        drop(ticket);
        Step::Ran
    }

    fn discard(&self) -> usize {
        let entries = self.mailbox.drain();
        for entry in &entries {
            entry.future.cancel();
        }
        entries.len()
    }

    fn try_schedule(&self) -> bool {
        // Pairs with the fence in `release`: either the releasing worker sees the
        // entry pushed before this call, or this CAS sees the flag it cleared.
        atomic::fence(Ordering::SeqCst);
        self.scheduled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn release(&self) -> bool {
        self.scheduled.store(false, Ordering::SeqCst);
        atomic::fence(Ordering::SeqCst);
        !self.mailbox.is_empty() && self.try_schedule()
    }
}

/// Delayed delivery of one envelope, cancelled through its future.
struct ScheduledWork<H: Handler> {
    cell: Arc<ActorCell<H>>,
    envelope: Envelope<H::Msg, H::Output>,
}

impl<H: Handler> fmt::Debug for ScheduledWork<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledWork")
            .field("actor", &self.cell.id)
            .field("msg", &self.envelope.future.message())
            .finish()
    }
}

impl<H: Handler> Work for ScheduledWork<H> {
    fn work(self: Box<Self>) {
        let ScheduledWork { cell, envelope } = *self;
        if envelope.future.is_pending() {
            cell.enqueue(envelope);
        }
    }

    fn cancel(self: Box<Self>) {
        self.envelope.future.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.envelope.future.is_cancelled()
    }
}

/// Handle to an actor. Cheap to clone; all clones address the same mailbox.
pub struct Actor<H: Handler> {
    cell: Arc<ActorCell<H>>,
}

impl<H: Handler> Clone for Actor<H> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<H: Handler> fmt::Debug for Actor<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("id", &self.cell.id)
            .field("name", &self.cell.name)
            .field("queued", &self.cell.mailbox.len())
            .finish()
    }
}

impl<H: Handler> Actor<H> {
    /// Creates an actor in `group` driven by `handler`.
    pub fn new(group: &ActorGroup, handler: H) -> Self {
        Self::build(group, None, handler)
    }

    /// Like [`Actor::new`], with a name used in logs and diagnostics.
    pub fn named(group: &ActorGroup, name: impl Into<String>, handler: H) -> Self {
        Self::build(group, Some(name.into()), handler)
    }

    fn build(group: &ActorGroup, name: Option<String>, handler: H) -> Self {
        let cell = Arc::new(ActorCell {
            id: ActorId::new(),
            name,
            group: group.clone(),
            mailbox: Mailbox::new(),
            scheduled: AtomicBool::new(false),
            handler: Mutex::new(handler),
        });
        let runnable: Weak<dyn Runnable> = Arc::downgrade(&cell) as Weak<ActorCell<H>>;
        group.register(runnable);
        Self { cell }
    }

    pub fn id(&self) -> ActorId {
        self.cell.id
    }

    pub fn name(&self) -> Option<&str> {
        self.cell.name.as_deref()
    }

    pub fn group(&self) -> &ActorGroup {
        &self.cell.group
    }

    /// Number of entries waiting in the mailbox.
    pub fn queue_len(&self) -> usize {
        self.cell.mailbox.len()
    }

    /// Sends `msg` and returns the future of its result. Never blocks.
    ///
    /// Once the group is stopped or killed the returned future is already failed
    /// with [`FutureError::Stopped`] and the message is dropped.
    pub fn send(&self, msg: H::Msg) -> ActorFuture<H::Output> {
        let future = ActorFuture::new(envelope::describe(&msg));
        self.cell.enqueue(Envelope::new(msg, future.clone()));
        future
    }

    /// Sends `msg` once `delay` has elapsed. A zero delay is the same as [`send`](Self::send).
    ///
    /// Cancelling the returned future before the delay elapses prevents delivery.
    /// If the group stops before the delay elapses the future is cancelled.
    pub fn send_later(&self, delay: Duration, msg: H::Msg) -> ActorFuture<H::Output> {
        if delay.is_zero() {
            return self.send(msg);
        }

        let future = ActorFuture::new(envelope::describe(&msg));
        if self.cell.group.is_stopped() {
            future.reject(FutureError::Stopped);
            return future;
        }

        let work = ScheduledWork {
            cell: self.cell.clone(),
            envelope: Envelope::new(msg, future.clone()),
        };
        self.cell.group.schedule(delay, Box::new(work));
        future
    }

    /// Sends `msg` once `after` is done, whether it completed, failed or was cancelled.
    pub fn send_when_complete<T>(&self, after: &ActorFuture<T>, msg: H::Msg) -> ActorFuture<H::Output> {
        let future = ActorFuture::new(envelope::describe(&msg));
        if self.cell.group.is_stopped() {
            future.reject(FutureError::Stopped);
            return future;
        }

        let cell = self.cell.clone();
        let envelope = Envelope::new(msg, future.clone());
        after.on_done(move || {
            if envelope.future.is_pending() {
                cell.enqueue(envelope);
            }
        });
        future
    }
}

impl<F, M, R> Actor<FnHandler<F, M, R>>
where
    F: FnMut(M) -> Result<R, BoxError> + Send + 'static,
    M: fmt::Debug + Send + 'static,
    R: Clone + Send + 'static,
{
    /// Creates an actor whose handler is a closure.
    ///
    /// ```no_run
    /// use flock::{Actor, ActorGroup};
    ///
    /// let group = ActorGroup::new()?;
    /// let mut total = 0_u64;
    /// let adder = Actor::from_fn(&group, move |n: u64| {
    ///     total += n;
    ///     Ok(total)
    /// });
    /// assert_eq!(adder.send(5).get(None)?, 5);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_fn(group: &ActorGroup, f: F) -> Self {
        Self::new(
            group,
            FnHandler {
                f,
                _marker: PhantomData,
            },
        )
    }
}

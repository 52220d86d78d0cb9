//! # Actor Groups
//!
//! An [`ActorGroup`] owns one worker pool and one scheduler, and every actor
//! belongs to exactly one group. The group is the unit of shutdown:
//!
//! - [`stop`](ActorGroup::stop) stops admitting work and lets admitted entries drain
//! - [`kill`](ActorGroup::kill) also cancels everything queued or scheduled
//! - [`join`](ActorGroup::join) waits until nothing is queued or executing
//!
//! ```no_run
//! use std::time::Duration;
//! use flock::{Actor, ActorGroup};
//!
//! let group = ActorGroup::new()?;
//! let echo = Actor::from_fn(&group, |s: String| Ok(s.len()));
//! let len = echo.send("hello".to_string());
//!
//! group.stop();
//! group.join(Some(Duration::from_secs(5)))?;
//! assert_eq!(len.get(None)?, 5);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fmt;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::GroupConfig;
use crate::error::GroupError;
use crate::log_group;
use crate::pool::{PoolSnapshot, Runnable, ThreadPool};
use crate::scheduler::{Scheduler, Work};

/// Lifecycle of a group as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    /// Accepting new work
    Running,
    /// Stopped, with admitted entries still draining
    Stopping,
    /// Stopped and drained
    Stopped,
    Killed,
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            GroupState::Running => "running",
            GroupState::Stopping => "stopping",
            GroupState::Stopped => "stopped",
            GroupState::Killed => "killed",
        };
        f.write_str(text)
    }
}

struct GroupInner {
    pool: ThreadPool,
    scheduler: Scheduler,
    killed: AtomicBool,
}

impl Drop for GroupInner {
    fn drop(&mut self) {
        self.scheduler.stop();
        self.pool.stop();
    }
}

/// Handle to a group of actors sharing a worker pool and a timer.
///
/// Clones share the same group. Once the last handle is dropped, including the
/// ones held by actors and by pending delayed sends, the group is stopped.
#[derive(Clone)]
pub struct ActorGroup {
    inner: Arc<GroupInner>,
}

impl fmt::Debug for ActorGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorGroup")
            .field("state", &self.state())
            .field("pool", &self.inner.pool)
            .field("scheduler", &self.inner.scheduler)
            .finish()
    }
}

impl ActorGroup {
    /// Creates a group with [`GroupConfig::default`].
    pub fn new() -> Result<Self, GroupError> {
        Self::with_config(GroupConfig::default())
    }

    pub fn with_config(config: GroupConfig) -> Result<Self, GroupError> {
        config.validate()?;

        let pool = ThreadPool::new(&config)?;
        let scheduler = match Scheduler::new(&config.timer_thread_name) {
            Ok(scheduler) => scheduler,
            Err(err) => {
                pool.kill();
                return Err(err);
            }
        };

        log_group!(
            "created",
            pool_size = config.pool_size,
            max_messages_per_turn = config.max_messages_per_turn
        );
        Ok(Self {
            inner: Arc::new(GroupInner {
                pool,
                scheduler,
                killed: AtomicBool::new(false),
            }),
        })
    }

    /// Stops accepting new work. Entries already queued still run; delayed sends
    /// that have not fired yet are cancelled. Idempotent, and a no-op after `kill`.
    pub fn stop(&self) {
        if self.is_killed() {
            return;
        }
        self.inner.scheduler.stop();
        self.inner.pool.stop();
        log_group!("stopped", outstanding = self.inner.pool.snapshot().outstanding);
    }

    /// Stops the group and cancels every queued and scheduled entry.
    ///
    /// Handler invocations already executing run to completion; nothing starts afterwards.
    pub fn kill(&self) {
        if self.inner.killed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.scheduler.stop();
        self.inner.pool.kill();
        log_group!("killed");
    }

    /// Blocks until no entry is queued or executing, or `timeout` elapses.
    ///
    /// Does not stop the group. Calling it from a handler of the same group with
    /// `None` never returns, since that handler itself is still executing.
    pub fn join(&self, timeout: Option<Duration>) -> Result<(), GroupError> {
        self.inner.pool.join(timeout)
    }

    /// Async form of [`join`](Self::join).
    pub async fn join_async(&self, timeout: Option<Duration>) -> Result<(), GroupError> {
        self.inner.pool.join_async(timeout).await
    }

    /// True once `stop` or `kill` has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.pool.is_stopped()
    }

    /// True when nothing is queued or executing.
    pub fn is_done(&self) -> bool {
        self.inner.pool.is_done()
    }

    pub fn is_killed(&self) -> bool {
        self.inner.killed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> GroupState {
        if self.is_killed() {
            GroupState::Killed
        } else if !self.is_stopped() {
            GroupState::Running
        } else if self.is_done() {
            GroupState::Stopped
        } else {
            GroupState::Stopping
        }
    }

    pub fn pool_size(&self) -> usize {
        self.inner.pool.pool_size()
    }

    pub(crate) fn register(&self, actor: Weak<dyn Runnable>) {
        self.inner.pool.register(actor);
    }

    pub(crate) fn submit(&self, actor: Arc<dyn Runnable>, push: impl FnOnce()) -> bool {
        if self.is_killed() {
            return false;
        }
        self.inner.pool.submit(actor, push)
    }

    pub(crate) fn schedule(&self, delay: Duration, work: Box<dyn Work>) {
        if self.is_killed() {
            work.cancel();
            return;
        }
        self.inner.scheduler.schedule(delay, work);
    }

    pub fn snapshot(&self) -> GroupSnapshot {
        GroupSnapshot {
            state: self.state(),
            pool: self.inner.pool.snapshot(),
            scheduled: self.inner.scheduler.len(),
        }
    }

    /// Human-readable diagnostic text describing the pool and timer.
    pub fn dump(&self) -> String {
        self.snapshot().to_string()
    }
}

/// Point-in-time view of a group. Rendered by [`ActorGroup::dump`].
#[derive(Debug, Clone)]
pub struct GroupSnapshot {
    pub state: GroupState,
    pub pool: PoolSnapshot,
    /// Delayed sends waiting for their due time
    pub scheduled: usize,
}

impl fmt::Display for GroupSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ActorGroup")?;
        writeln!(f, "  state:       {}", self.state)?;
        writeln!(f, "  pool size:   {}", self.pool.pool_size)?;
        writeln!(f, "  ready:       {}", self.pool.ready)?;
        writeln!(f, "  outstanding: {}", self.pool.outstanding)?;
        writeln!(f, "  in flight:   {}", self.pool.in_flight)?;
        writeln!(f, "  scheduled:   {}", self.scheduled)?;
        writeln!(f, "  workers:")?;
        for (name, status) in &self.pool.workers {
            writeln!(f, "    {name}: {status:?}")?;
        }
        Ok(())
    }
}

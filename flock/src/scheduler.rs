//! # Scheduler
//!
//! The single timer authority of a group. Entries are kept in a min-heap keyed by
//! due instant and insertion sequence, so equal due times fire in the order they
//! were scheduled. A dedicated thread sleeps until the earliest entry is due and
//! delivers it outside the lock.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{debug, trace};

use crate::error::GroupError;
use crate::logging;

/// Delays beyond this are clamped; they would never fire in practice anyway.
const MAX_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A unit of delayed work. The work object is also its cancellation handle.
pub trait Work: fmt::Debug + Send + 'static {
    /// Delivers the work. Called at most once, on the timer thread, at or after the due time.
    fn work(self: Box<Self>);

    /// Called instead of `work` when the scheduler stops with the entry still queued.
    fn cancel(self: Box<Self>);

    /// Checked immediately before delivery; a cancelled entry is dropped.
    fn is_cancelled(&self) -> bool;
}

struct Entry {
    due: Instant,
    seq: u64,
    work: Box<dyn Work>,
}

impl Eq for Entry {}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Ord for Entry {
    // BinaryHeap is a max-heap; reverse to pop the earliest due, then the earliest scheduled.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

struct TimerState {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    running: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    wake: Condvar,
}

impl TimerShared {
    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Delivers delayed work in due-time order on a dedicated thread.
pub struct Scheduler {
    shared: Arc<TimerShared>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Scheduler")
            .field("pending", &state.heap.len())
            .field("running", &state.running)
            .finish()
    }
}

impl Scheduler {
    /// Starts the timer thread.
    pub fn new(thread_name: &str) -> Result<Self, GroupError> {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                running: true,
            }),
            wake: Condvar::new(),
        });

        let dispatch = logging::current_dispatch();
        let timer = shared.clone();
        thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || tracing::dispatcher::with_default(&dispatch, || timer_loop(&timer)))
            .with_context(|| format!("failed to spawn timer thread {thread_name}"))?;

        Ok(Self { shared })
    }

    /// Queues `work` for delivery `delay` from now.
    ///
    /// On a stopped scheduler the work is cancelled immediately.
    pub fn schedule(&self, delay: Duration, work: Box<dyn Work>) {
        let due = Instant::now() + delay.min(MAX_DELAY);
        {
            let mut state = self.shared.lock();
            if state.running {
                let seq = state.next_seq;
                state.next_seq += 1;
                trace!(?delay, seq, work = ?work, "work scheduled");
                state.heap.push(Entry { due, seq, work });
                drop(state);
                self.shared.wake.notify_one();
                return;
            }
        }
        work.cancel();
    }

    /// Stops the timer thread and cancels every entry still queued.
    ///
    /// Does not wait for the timer thread, so it is safe to call from work itself.
    pub fn stop(&self) {
        let remaining = {
            let mut state = self.shared.lock();
            if !state.running {
                return;
            }
            state.running = false;
            std::mem::take(&mut state.heap)
        };
        self.shared.wake.notify_all();

        debug!(cancelled = remaining.len(), "scheduler stopped");
        for entry in remaining.into_sorted_vec().into_iter().rev() {
            entry.work.cancel();
        }
    }

    pub fn is_stopped(&self) -> bool {
        !self.shared.lock().running
    }

    /// Number of entries waiting for their due time, cancelled ones included.
    pub fn len(&self) -> usize {
        self.shared.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn timer_loop(shared: &TimerShared) {
    debug!("timer started");
    let mut state = shared.lock();
    loop {
        if !state.running {
            break;
        }

        let now = Instant::now();
        let next_due = state.heap.peek().map(|entry| entry.due);
        state = match next_due {
            None => shared.wake.wait(state).unwrap_or_else(PoisonError::into_inner),
            Some(due) if due > now => {
                shared
                    .wake
                    .wait_timeout(state, due - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            Some(_) => {
                let entry = state.heap.pop();
                drop(state);
                if let Some(entry) = entry {
                    if entry.work.is_cancelled() {
                        trace!(seq = entry.seq, "skipping cancelled work");
                    } else {
                        trace!(seq = entry.seq, "delivering work");
                        entry.work.work();
                    }
                }
                shared.lock()
            }
        };
    }
    debug!("timer exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug)]
    struct Record {
        tag: u32,
        log: Arc<Mutex<Vec<u32>>>,
        cancelled: Arc<AtomicBool>,
    }

    impl Work for Record {
        fn work(self: Box<Self>) {
            self.log.lock().unwrap().push(self.tag);
        }

        fn cancel(self: Box<Self>) {
            self.cancelled.store(true, Ordering::SeqCst);
        }

        fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }
    }

    fn record(tag: u32, log: &Arc<Mutex<Vec<u32>>>) -> (Box<Record>, Arc<AtomicBool>) {
        let cancelled = Arc::new(AtomicBool::new(false));
        let work = Box::new(Record {
            tag,
            log: log.clone(),
            cancelled: cancelled.clone(),
        });
        (work, cancelled)
    }

    #[test]
    fn delivers_in_due_order_with_stable_ties() {
        let scheduler = Scheduler::new("test-timer").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        scheduler.schedule(Duration::from_millis(60), record(3, &log).0);
        scheduler.schedule(Duration::from_millis(20), record(1, &log).0);
        let due_together = Duration::from_millis(40);
        scheduler.schedule(due_together, record(2, &log).0);
        scheduler.schedule(due_together, record(22, &log).0);

        thread::sleep(Duration::from_millis(250));
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 22, 3]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn cancelled_work_is_skipped() {
        let scheduler = Scheduler::new("test-timer").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (work, cancelled) = record(1, &log);
        scheduler.schedule(Duration::from_millis(30), work);
        cancelled.store(true, Ordering::SeqCst);

        thread::sleep(Duration::from_millis(120));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn stop_cancels_pending_entries() {
        let scheduler = Scheduler::new("test-timer").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (work, cancelled) = record(1, &log);
        scheduler.schedule(Duration::from_secs(60), work);
        assert_eq!(scheduler.len(), 1);

        scheduler.stop();
        assert!(scheduler.is_stopped());
        assert!(cancelled.load(Ordering::SeqCst));
        assert!(scheduler.is_empty());

        let (late, late_cancelled) = record(2, &log);
        scheduler.schedule(Duration::ZERO, late);
        assert!(late_cancelled.load(Ordering::SeqCst));
        assert!(log.lock().unwrap().is_empty());
    }
}

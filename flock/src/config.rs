use std::time::Duration;

use crate::error::GroupError;

pub const DEFAULT_MAX_MESSAGES_PER_TURN: usize = 10;

/// Configuration for an [`ActorGroup`](crate::group::ActorGroup).
#[derive(Clone, Debug)]
pub struct GroupConfig {
    /// The number of worker threads in the group's pool. Fixed for the group's lifetime.
    pub pool_size: usize,

    /// Max entries a worker runs for one actor before releasing it back to the ready queue.
    ///
    /// This is the fairness bound: a busy actor holds a worker for at most this many
    /// consecutive handler invocations. `1` re-schedules after every entry.
    pub max_messages_per_turn: usize,

    /// How long an idle worker waits on the ready queue before re-checking for shutdown.
    pub idle_poll: Duration,

    /// Worker threads are named `{thread_name_prefix}-{id}`.
    pub thread_name_prefix: String,

    /// Name of the scheduler's timer thread.
    pub timer_thread_name: String,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            pool_size: num_cpus::get(),
            max_messages_per_turn: DEFAULT_MAX_MESSAGES_PER_TURN,
            idle_poll: Duration::from_millis(50),
            thread_name_prefix: "flock-worker".to_string(),
            timer_thread_name: "flock-timer".to_string(),
        }
    }
}

impl GroupConfig {
    /// Default configuration with the given number of worker threads.
    pub fn with_pool_size(pool_size: usize) -> Self {
        Self {
            pool_size,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), GroupError> {
        if self.pool_size == 0 {
            return Err(GroupError::InvalidConfig("pool_size must be at least 1".to_string()));
        }
        if self.max_messages_per_turn == 0 {
            return Err(GroupError::InvalidConfig(
                "max_messages_per_turn must be at least 1".to_string(),
            ));
        }
        if self.idle_poll.is_zero() {
            return Err(GroupError::InvalidConfig("idle_poll must be non-zero".to_string()));
        }
        Ok(())
    }
}

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use flock::{ActorGroup, GroupConfig};

/// Default bound for waits that are expected to succeed
pub const WAIT: Duration = Duration::from_secs(5);

/// Creates a group with `pool_size` workers and a short idle poll so shutdown is quick.
pub fn setup_group(pool_size: usize) -> anyhow::Result<ActorGroup> {
    flock::logging::init_test();
    let config = GroupConfig {
        idle_poll: Duration::from_millis(5),
        ..GroupConfig::with_pool_size(pool_size)
    };
    Ok(ActorGroup::with_config(config)?)
}

/// Runs `test_fn` against a fresh group, then stops and joins it.
pub fn with_test_group<F, T>(pool_size: usize, test_fn: F) -> anyhow::Result<T>
where
    F: FnOnce(&ActorGroup) -> anyhow::Result<T>,
{
    let group = setup_group(pool_size)?;
    let result = test_fn(&group)?;
    group.stop();
    group.join(Some(WAIT))?;
    Ok(result)
}

/// A shared, append-only record of what handlers observed.
pub type Log<T> = Arc<Mutex<Vec<T>>>;

pub fn new_log<T>() -> Log<T> {
    Arc::new(Mutex::new(Vec::new()))
}

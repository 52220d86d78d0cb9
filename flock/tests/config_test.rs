// Integration tests for flock::config

use std::time::Duration;

use flock::config::{DEFAULT_MAX_MESSAGES_PER_TURN, GroupConfig};
use flock::{ActorGroup, GroupError};

#[test]
fn test_group_config_defaults() {
    let config = GroupConfig::default();

    assert_eq!(config.pool_size, num_cpus::get());
    assert_eq!(config.max_messages_per_turn, DEFAULT_MAX_MESSAGES_PER_TURN);
    assert_eq!(config.idle_poll, Duration::from_millis(50));
    assert_eq!(config.thread_name_prefix, "flock-worker");
    assert_eq!(config.timer_thread_name, "flock-timer");
    assert!(config.validate().is_ok());
}

#[test]
fn test_with_pool_size() {
    let config = GroupConfig::with_pool_size(3);
    assert_eq!(config.pool_size, 3);
    assert_eq!(config.max_messages_per_turn, DEFAULT_MAX_MESSAGES_PER_TURN);
}

#[test]
fn test_invalid_values_are_rejected() {
    let zero_turn = GroupConfig {
        max_messages_per_turn: 0,
        ..GroupConfig::default()
    };
    let zero_poll = GroupConfig {
        idle_poll: Duration::ZERO,
        ..GroupConfig::default()
    };

    for config in [GroupConfig::with_pool_size(0), zero_turn, zero_poll] {
        let err = config.validate().unwrap_err();
        assert!(matches!(err, GroupError::InvalidConfig(_)));
        assert!(err.to_string().starts_with("Invalid configuration"));
        assert!(matches!(ActorGroup::with_config(config), Err(GroupError::InvalidConfig(_))));
    }
}

#[test]
fn test_worker_threads_use_configured_names() -> anyhow::Result<()> {
    let config = GroupConfig {
        thread_name_prefix: "named-worker".to_string(),
        ..GroupConfig::with_pool_size(1)
    };
    let group = ActorGroup::with_config(config)?;
    let actor = flock::Actor::from_fn(&group, |_: ()| {
        Ok(std::thread::current().name().map(str::to_string))
    });

    let name = actor.send(()).get(Some(Duration::from_secs(5)))?;
    assert_eq!(name.as_deref(), Some("named-worker-0"));
    group.kill();
    Ok(())
}

#[test]
fn test_config_debug_format() {
    let config = GroupConfig::default();
    assert!(format!("{:?}", config).contains("max_messages_per_turn"));
}

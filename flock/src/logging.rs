// Logging for flock
//
// Built on the `tracing` ecosystem. The runtime itself only emits events; an
// application (or a test) decides where they go by installing a subscriber
// through one of the `init_*` functions below.
//
// ```rust
// use flock::logging;
//
// // INFO level, human-readable console output
// logging::init_default();
//
// // or DEBUG for the runtime, TRACE for the pool and timer
// logging::init_development();
// ```
//
// Worker and timer threads capture the dispatcher of the thread that created
// the group (see `current_dispatch`), so a scoped subscriber set with
// `tracing::dispatcher::set_default` also sees the runtime's own events.

use std::sync::Once;

use tracing::{Level, Subscriber};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Configuration for the flock logging setup
///
/// ```rust
/// use flock::logging::LogConfig;
/// use tracing::Level;
///
/// let config = LogConfig {
///     level: Level::DEBUG,
///     target_filters: Some("flock::pool=trace".to_string()),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: Level,
    /// Whether to use JSON format for logs
    pub json_format: bool,
    /// Whether to include file and line information
    pub show_file_line: bool,
    /// Whether to include thread name/id
    pub show_thread_info: bool,
    /// Whether to include timestamps
    pub show_time: bool,
    /// Target filter expressions (format: "target=level,target2=level2,...")
    pub target_filters: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_file_line: true,
            show_thread_info: true,
            show_time: true,
            target_filters: None,
        }
    }
}

// Initialization guard to ensure we only initialize once
static INIT: Once = Once::new();

/// Installs the global subscriber. Only the first call in a process takes effect.
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let mut env_filter = EnvFilter::from_default_env().add_directive(config.level.into());

        if let Some(filters) = &config.target_filters {
            for filter in filters.split(',') {
                if let Ok(directive) = filter.trim().parse() {
                    env_filter = env_filter.add_directive(directive);
                }
            }
        }

        let registry = tracing_subscriber::registry().with(env_filter);

        let subscriber: Box<dyn Subscriber + Send + Sync> = if config.json_format {
            Box::new(registry.with(fmt::layer().json().flatten_event(true)))
        } else {
            let fmt_layer = fmt::layer()
                .with_ansi(atty::is(atty::Stream::Stdout))
                .with_file(config.show_file_line)
                .with_line_number(config.show_file_line)
                .with_thread_names(config.show_thread_info)
                .with_thread_ids(config.show_thread_info);
            if config.show_time {
                Box::new(registry.with(fmt_layer))
            } else {
                Box::new(registry.with(fmt_layer.without_time()))
            }
        };

        if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("Error setting global tracing subscriber: {}", err);
        }
    });
}

/// INFO level, human-readable console output.
pub fn init_default() {
    init(LogConfig::default());
}

/// DEBUG for the runtime and TRACE for the pool and timer, with file/line information.
pub fn init_development() {
    init(LogConfig {
        level: Level::DEBUG,
        target_filters: Some("flock=debug,flock::pool=trace,flock::scheduler=trace".to_string()),
        ..Default::default()
    });
}

/// JSON output at INFO, without file/line information.
pub fn init_production() {
    init(LogConfig {
        level: Level::INFO,
        json_format: true,
        show_file_line: false,
        show_thread_info: true,
        show_time: true,
        target_filters: None,
    });
}

/// Warnings and errors only, compact output for test runs.
pub fn init_test() {
    init(LogConfig {
        level: Level::WARN,
        json_format: false,
        show_file_line: true,
        show_thread_info: false,
        show_time: false,
        target_filters: None,
    });
}

/// The dispatcher active on the calling thread.
///
/// Captured when the pool and timer threads are spawned so their events go to
/// the same subscriber as the code that created the group.
#[inline]
pub fn current_dispatch() -> tracing::Dispatch {
    tracing::dispatcher::get_default(|dispatch| dispatch.clone())
}

/// Span covering work done on behalf of one actor.
///
/// ```rust
/// let span = flock::actor_span!("3f2c…", name = "counter");
/// let _guard = span.enter();
/// ```
#[macro_export]
macro_rules! actor_span {
    ($actor_id:expr) => {
        tracing::debug_span!("actor", id = %$actor_id)
    };
    ($actor_id:expr, $($fields:tt)*) => {
        tracing::debug_span!("actor", id = %$actor_id, $($fields)*)
    };
}

/// Worker pool events
///
/// ```rust
/// flock::log_pool!("started", pool_size = 4);
/// ```
#[macro_export]
macro_rules! log_pool {
    ($event:expr) => {
        tracing::debug!(component = "pool", event = $event);
    };
    ($event:expr, $($fields:tt)*) => {
        tracing::debug!(component = "pool", event = $event, $($fields)*);
    };
}

/// Group lifecycle events
///
/// ```rust
/// flock::log_group!("stopping", outstanding = 3);
/// ```
#[macro_export]
macro_rules! log_group {
    ($event:expr) => {
        tracing::info!(component = "group", event = $event);
    };
    ($event:expr, $($fields:tt)*) => {
        tracing::info!(component = "group", event = $event, $($fields)*);
    };
}

// Flock Actor Runtime
//
// Actors with FIFO mailboxes executed by a bounded pool of OS threads. Every
// send returns an `ActorFuture` that can be waited on, from a thread or from an
// async task, or cancelled. Groups own the pool and a timer for delayed sends,
// and control shutdown with stop / kill / join.

pub mod actor;
pub mod config;
pub mod error;
pub mod future;
pub mod group;
pub mod logging;
pub mod scheduler;

mod envelope;
mod mailbox;
mod pool;

// Re-export commonly used types
pub use actor::{Actor, ActorId, FnHandler, Handler};
pub use config::GroupConfig;
pub use error::{BoxError, FutureError, GroupError, HandlerFailure, HandlerPanic};
pub use future::{ActorFuture, FutureState};
pub use group::{ActorGroup, GroupSnapshot, GroupState};
pub use pool::{PoolSnapshot, PoolState, WorkerStatus};

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Error type returned by actor handlers.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors observed by a caller waiting on an [`ActorFuture`](crate::future::ActorFuture).
#[derive(Error, Debug, Clone)]
pub enum FutureError {
    #[error("Future timed out after {0:?}")]
    Timeout(Duration),
    #[error("Future was cancelled")]
    Cancelled,
    #[error("Actor handler failed: {0}")]
    Handler(HandlerFailure),
    #[error("Actor group is stopped")]
    Stopped,
}

impl FutureError {
    /// Returns the handler failure carried by this error, if any.
    pub fn handler_failure(&self) -> Option<&HandlerFailure> {
        match self {
            FutureError::Handler(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Errors raised by the group controller.
#[derive(Error, Debug)]
pub enum GroupError {
    #[error("ActorGroup.join timed out after {0:?}")]
    JoinTimeout(Duration),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Internal group error: {0}")]
    Other(#[from] anyhow::Error),
}

/// A panic raised inside a handler, captured as an error value.
#[derive(Error, Debug, Clone)]
#[error("handler panicked: {0}")]
pub struct HandlerPanic(pub String);

/// The failure a handler produced, shared verbatim with every waiter.
#[derive(Clone)]
pub struct HandlerFailure {
    cause: Arc<dyn StdError + Send + Sync + 'static>,
}

impl HandlerFailure {
    pub fn new(cause: BoxError) -> Self {
        Self { cause: Arc::from(cause) }
    }

    /// Builds a failure from the payload of a caught panic.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_string(),
                Err(_) => "<non-string panic payload>".to_string(),
            },
        };
        Self::new(Box::new(HandlerPanic(message)))
    }

    /// The error returned (or the panic raised) by the handler.
    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.cause
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.cause.downcast_ref::<E>()
    }

    pub fn is_panic(&self) -> bool {
        self.cause.is::<HandlerPanic>()
    }
}

impl fmt::Debug for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandlerFailure").field(&self.cause).finish()
    }
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.cause, f)
    }
}

impl StdError for HandlerFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.cause)
    }
}

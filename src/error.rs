//! Errors produced by the event loop and stored as evaluation outcomes.
//!
//! Every outcome in `coloop` is a tagged [Result]: a task body that "raises"
//! simply returns `Err`, and the loop stores that error as the evaluation's
//! outcome. Retrieving the result twice hands out the same error again, which
//! is why [Error] is [Clone] and keeps arbitrary errors behind an [Arc].
use std::{fmt, io, sync::Arc, time::Duration};

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error type of the event loop.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A task body failed. The inner error is propagated verbatim.
    #[error("{0}")]
    Runtime(Arc<dyn std::error::Error + Send + Sync + 'static>),

    /// A deadline passed before the awaited evaluation concluded.
    #[error("{message}")]
    Timeout { message: String, elapsed: Duration },

    /// The evaluation was cancelled explicitly.
    #[error("{0}")]
    Cancelled(String),

    /// The loop or an evaluation was used in a way it does not support.
    #[error("{0}")]
    Protocol(String),

    /// The readiness multiplexing syscall failed.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Message {}

impl Error {
    /// Wrap an arbitrary error as a runtime failure.
    pub fn runtime<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Runtime(Arc::new(err))
    }

    /// A runtime failure carrying only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Runtime(Arc::new(Message(message.into())))
    }

    /// The default error produced when `result().within(d)` runs out of time.
    pub fn timeout(elapsed: Duration) -> Self {
        Self::Timeout {
            message: format!(
                "evaluation timed out after {} second(s)",
                elapsed.as_secs_f64()
            ),
            elapsed,
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled(reason.into())
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

//! Error taxonomy of the hub.
//!
//! Every fallible operation in the crate returns [`Result`]. The variants
//! fall into a few families that the hub treats differently when an error
//! surfaces from a callback or a task:
//!
//! - **not-errors** ([`Error::Cancelled`], [`Error::SystemExit`]) are never
//!   printed;
//! - **system errors** ([`Error::SystemExit`], [`Error::Interrupted`]) are
//!   escalated to the root context of the hub's thread;
//! - **shutdown** ([`Error::HubDestroyed`]) is the expected way a destroyed
//!   hub unwinds its tasks;
//! - **loop exhaustion** ([`Error::HubIdle`]) is returned to the root when
//!   nothing is left to wait on.

use std::io;
use std::sync::Arc;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the hub and its primitives.
///
/// `Error` is `Clone` so a finished task can report its failure to every
/// observer (handles, links, the error stream) without consuming it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The task was cancelled. This is the default kill error.
    #[error("task cancelled")]
    Cancelled,

    /// The hub ran out of work: nothing runnable and no referenced watcher.
    #[error("this operation would block forever: the hub has nothing left to run")]
    HubIdle,

    /// The hub was destroyed while the operation was pending, or the
    /// operation referenced a destroyed hub.
    #[error("hub destroyed")]
    HubDestroyed,

    /// A timer won against the awaited operation.
    #[error("operation timed out")]
    Timeout,

    /// Graceful process exit request.
    #[error("system exit with status {0}")]
    SystemExit(i32),

    /// Interactive interrupt (the equivalent of a keyboard interrupt).
    #[error("interrupted")]
    Interrupted,

    /// A task or callback panicked; carries the panic message.
    #[error("panicked: {0}")]
    Panicked(String),

    /// A waiter received a second `switch`/`throw`.
    #[error("waiter has already been switched")]
    AlreadySwitched,

    /// A blocking call was attempted where the hub cannot block.
    #[error("impossible to block here: {0}")]
    BlockingSwitchOut(&'static str),

    /// Two tasks attempted to wait on the same object.
    #[error("{0} is already being waited on by another task")]
    ConcurrentObjectUse(String),

    /// The result of a task was already taken by a previous await.
    #[error("task result already taken")]
    ResultTaken,

    /// The signal number cannot be watched.
    #[error("invalid signal number {0}")]
    InvalidSignal(i32),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The thread pool refused or lost a job.
    #[error("thread pool error: {0}")]
    ThreadPool(String),

    /// Name resolution failed.
    #[error("resolve error: {0}")]
    Resolve(String),

    /// An OS-level I/O error.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// Application-defined failure.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Builds an application-defined error.
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Builds a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub(crate) fn thread_pool(msg: impl Into<String>) -> Self {
        Error::ThreadPool(msg.into())
    }

    /// Returns `true` for conditions that are reported structurally but
    /// never printed: cancellation and graceful exit.
    pub fn is_not_error(&self) -> bool {
        matches!(self, Error::Cancelled | Error::SystemExit(_))
    }

    /// Returns `true` for process-level errors that must reach the root
    /// context of the hub's thread.
    pub fn is_system_error(&self) -> bool {
        matches!(self, Error::SystemExit(_) | Error::Interrupted)
    }

    /// Returns `true` for the shutdown signal used to unwind a destroyed hub.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Error::HubDestroyed)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::Cancelled.is_not_error());
        assert!(!Error::Cancelled.is_system_error());

        assert!(Error::SystemExit(0).is_not_error());
        assert!(Error::SystemExit(0).is_system_error());

        assert!(Error::Interrupted.is_system_error());
        assert!(!Error::Interrupted.is_not_error());

        assert!(Error::HubDestroyed.is_shutdown());
        assert!(!Error::other("boom").is_system_error());
    }

    #[test]
    fn test_io_conversion_keeps_message() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*payload), "static");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*payload), "owned");

        let payload: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(&*payload), "unknown panic payload");
    }
}

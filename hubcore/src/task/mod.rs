//! Task primitives.
//!
//! A task is a future owned by a hub's arena and driven by its loop. This
//! module defines:
//! - the arena entry and the shared completion cell,
//! - the per-task waker,
//! - [`TaskHandle`] and the group helpers [`joinall`] / [`killall`],
//! - tree locals shared along the spawn tree.
//!
//! Most users interact with it through [`spawn`] and the returned handles.

pub(crate) mod core;
pub(crate) mod handle;
pub(crate) mod locals;
pub(crate) mod set;
pub(crate) mod waker;

pub use handle::TaskHandle;
pub use locals::TreeLocals;
pub use set::{joinall, killall};

use crate::error::{Error, Result};
use crate::hub::get_hub;
use crate::utils::slab::Key;

use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Identifier of a task within its hub.
///
/// Ids are generation-checked: the id of a finished task never designates
/// a later task that reused its arena entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskId(pub(crate) Key);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}.{}", self.0.index(), self.0.generation())
    }
}

/// Spawns a task on the current thread's hub.
///
/// The task does not run before the caller yields to the loop.
///
/// # Errors
///
/// Returns [`Error::HubDestroyed`] if the hub was destroyed, or the error
/// of creating the hub.
///
/// # Examples
///
/// ```rust,ignore
/// let handle = hubcore::spawn(async { Ok(42) })?;
/// assert_eq!(handle.await?, 42);
/// ```
pub fn spawn<F, T>(future: F) -> Result<TaskHandle<T>>
where
    F: Future<Output = Result<T>> + 'static,
    T: 'static,
{
    get_hub()?.spawn(future)
}

/// Spawns a task that starts `delay` from now on the current thread's hub.
pub fn spawn_later<F, T>(delay: Duration, future: F) -> Result<TaskHandle<T>>
where
    F: Future<Output = Result<T>> + 'static,
    T: 'static,
{
    get_hub()?.spawn_later(delay, future)
}

/// Kills `handle` with `error`, or [`Error::Cancelled`] with `None`.
///
/// See [`TaskHandle::kill`].
pub fn kill<T>(handle: &TaskHandle<T>, error: Option<Error>) {
    handle.kill(error.unwrap_or(Error::Cancelled));
}

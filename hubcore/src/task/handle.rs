use super::TaskId;
use super::core::{TaskCell, TaskControl, TaskState};
use super::locals::TreeLocals;
use crate::error::{Error, Result};
use crate::hub::context;
use crate::time::with_timeout;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

/// A handle to a spawned task.
///
/// A `TaskHandle` is a [`Future`] resolving to the task's result. The
/// result can be awaited once; a later await fails with
/// [`Error::ResultTaken`]. The status accessors ([`is_ready`],
/// [`exception`], ...) keep working after that.
///
/// Dropping the handle does **not** kill the task.
///
/// [`is_ready`]: TaskHandle::is_ready
/// [`exception`]: TaskHandle::exception
pub struct TaskHandle<T> {
    id: TaskId,
    pub(crate) cell: Rc<TaskCell<T>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(id: TaskId, cell: Rc<TaskCell<T>>) -> Self {
        Self { id, cell }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Small number identifying the task within its hub, in spawn order.
    pub fn minimal_ident(&self) -> u64 {
        self.cell.ident()
    }

    /// Whether the task was polled at least once.
    pub fn is_started(&self) -> bool {
        self.cell.state() != TaskState::Scheduled
    }

    /// Whether the task finished, successfully or not.
    pub fn is_ready(&self) -> bool {
        self.cell.is_finished()
    }

    /// Whether the task finished without error. A task ended by a plain
    /// cancellation counts as successful.
    pub fn is_successful(&self) -> bool {
        self.is_ready()
            && self
                .cell
                .error()
                .is_none_or(|err| matches!(err, Error::Cancelled))
    }

    /// The error the task finished with, if any.
    pub fn exception(&self) -> Option<Error> {
        self.cell.error()
    }

    /// The task that spawned this one, when the hub tracks the task tree.
    pub fn spawner(&self) -> Option<TaskId> {
        self.cell.spawner()
    }

    /// Locals shared with the task tree, when the hub tracks it.
    pub fn tree_locals(&self) -> Option<TreeLocals> {
        self.cell.locals().cloned()
    }

    /// Kills the task with `error`.
    ///
    /// A task that never ran is finished immediately and its future is
    /// dropped without being polled. A suspended task is resumed and the
    /// primitive it waits on fails with `error`. The call returns without
    /// waiting; use [`join`](TaskHandle::join) to wait for the task to
    /// finish. Killing a finished task does nothing.
    pub fn kill(&self, error: Error) {
        if self.is_ready() {
            return;
        }
        if let Some(hub) = self.cell.hub() {
            hub.kill_task(self.id, error);
        }
    }

    /// Kills the task with [`Error::Cancelled`].
    pub fn cancel(&self) {
        self.kill(Error::Cancelled);
    }

    /// Runs `f` as a loop callback once the task finished. Linking a
    /// finished task schedules `f` right away.
    pub fn link<F>(&self, f: F)
    where
        F: FnOnce() + 'static,
    {
        self.cell.add_link(Box::new(f));
    }

    /// Waits for the task to finish, without taking its result.
    ///
    /// Returns `Ok(true)` once the task finished, or `Ok(false)` if
    /// `timeout` elapsed first.
    ///
    /// # Errors
    ///
    /// Fails if the waiting task is itself killed.
    pub async fn join(&self, timeout: Option<Duration>) -> Result<bool> {
        let ready = Ready { cell: &self.cell };

        match timeout {
            None => ready.await.map(|()| true),
            Some(timeout) => match with_timeout(timeout, ready).await {
                Ok(()) => Ok(true),
                Err(Error::Timeout) => Ok(false),
                Err(err) => Err(err),
            },
        }
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<T>> {
        if let Some(err) = context::take_throw() {
            return Poll::Ready(Err(err));
        }

        if self.cell.is_finished() {
            return Poll::Ready(self.cell.take_result().unwrap_or(Err(Error::ResultTaken)));
        }

        self.cell.add_waiter(cx.waker());
        Poll::Pending
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("ident", &self.cell.ident())
            .field("state", &self.cell.state())
            .field("taken", &self.cell.is_taken())
            .finish()
    }
}

/// Resolves once a task finished.
struct Ready<'a, T> {
    cell: &'a TaskCell<T>,
}

impl<T> Future for Ready<'_, T> {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        if let Some(err) = context::take_throw() {
            return Poll::Ready(Err(err));
        }

        if self.cell.is_finished() {
            return Poll::Ready(Ok(()));
        }

        self.cell.add_waiter(cx.waker());
        Poll::Pending
    }
}

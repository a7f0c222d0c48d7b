use super::TaskId;
use super::locals::TreeLocals;
use crate::error::{Error, Result};
use crate::hub::{Hub, HubInner};
use crate::reactor::Callback;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::Waker;

/// Lifecycle of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TaskState {
    /// Spawned, never polled.
    Scheduled,
    /// Polled at least once and not finished.
    Running,
    /// Finished with a value or an error.
    Finished,
}

/// The completion side of a task, independent of its output type.
///
/// The hub's arena stores tasks as `Rc<dyn TaskControl>` so it can fail
/// them (kill, destroy, panic) without knowing `T`.
pub(crate) trait TaskControl {
    fn mark_running(&self);

    /// Finishes the task with `error` unless it already finished.
    fn fail(&self, error: Error);

    fn state(&self) -> TaskState;

    fn ident(&self) -> u64;
}

/// One entry of the hub's task arena.
pub(crate) struct TaskSlot {
    /// The wrapped future; taken out while it is being polled.
    pub(crate) future: Option<Pin<Box<dyn Future<Output = ()>>>>,
    pub(crate) control: Rc<dyn TaskControl>,

    /// Created once per task so repeated polls hand out the same waker.
    pub(crate) waker: Waker,

    pub(crate) started: bool,

    /// Error injected by a kill, delivered at the next poll.
    pub(crate) thrown: Option<Error>,

    /// Timer of a task spawned with a delay, until it fires.
    pub(crate) start_timer: Option<crate::utils::slab::Key>,

    pub(crate) spawner: Option<TaskId>,
    pub(crate) locals: Option<TreeLocals>,
}

/// Shared state between a task and its [`TaskHandle`](super::TaskHandle)s.
pub(crate) struct TaskCell<T> {
    ident: u64,
    id: Cell<Option<TaskId>>,
    state: Cell<TaskState>,
    result: RefCell<Option<Result<T>>>,
    /// Whether an await of the handle already took the result.
    taken: Cell<bool>,
    /// The failure, kept after the result is taken.
    error: RefCell<Option<Error>>,
    waiters: RefCell<Vec<Waker>>,
    links: RefCell<Vec<Box<dyn FnOnce()>>>,
    hub: Weak<HubInner>,
    spawner: Option<TaskId>,
    locals: Option<TreeLocals>,
}

impl<T> TaskCell<T> {
    pub(crate) fn new(
        ident: u64,
        hub: Weak<HubInner>,
        spawner: Option<TaskId>,
        locals: Option<TreeLocals>,
    ) -> Self {
        Self {
            ident,
            id: Cell::new(None),
            state: Cell::new(TaskState::Scheduled),
            result: RefCell::new(None),
            taken: Cell::new(false),
            error: RefCell::new(None),
            waiters: RefCell::new(Vec::new()),
            links: RefCell::new(Vec::new()),
            hub,
            spawner,
            locals,
        }
    }

    pub(crate) fn set_id(&self, id: TaskId) {
        self.id.set(Some(id));
    }

    pub(crate) fn hub(&self) -> Option<Hub> {
        self.hub.upgrade().map(Hub::from_inner)
    }

    pub(crate) fn spawner(&self) -> Option<TaskId> {
        self.spawner
    }

    pub(crate) fn locals(&self) -> Option<&TreeLocals> {
        self.locals.as_ref()
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.state.get() == TaskState::Finished
    }

    pub(crate) fn error(&self) -> Option<Error> {
        self.error.borrow().clone()
    }

    pub(crate) fn is_taken(&self) -> bool {
        self.taken.get()
    }

    /// Takes the result for an await of the handle.
    pub(crate) fn take_result(&self) -> Option<Result<T>> {
        let result = self.result.borrow_mut().take();
        if result.is_some() {
            self.taken.set(true);
        }
        result
    }

    /// Registers `waker` to be woken when the task finishes.
    pub(crate) fn add_waiter(&self, waker: &Waker) {
        let mut waiters = self.waiters.borrow_mut();
        if !waiters.iter().any(|w| w.will_wake(waker)) {
            waiters.push(waker.clone());
        }
    }

    /// Registers `link` to run as a loop callback once the task finished.
    /// A finished task schedules it right away.
    pub(crate) fn add_link(&self, link: Box<dyn FnOnce()>) {
        if self.is_finished() {
            if let Some(hub) = self.hub() {
                hub.schedule_link(link);
            }
            return;
        }
        self.links.borrow_mut().push(link);
    }

    /// Stores the outcome, wakes the waiters and schedules the links.
    ///
    /// A system error is escalated to the hub, which stops its loop and
    /// hands the error to the root.
    pub(crate) fn complete(&self, result: Result<T>) {
        if self.is_finished() {
            return;
        }
        self.state.set(TaskState::Finished);

        let escalate = match &result {
            Err(err) => {
                *self.error.borrow_mut() = Some(err.clone());
                err.is_system_error().then(|| err.clone())
            }
            Ok(_) => None,
        };

        *self.result.borrow_mut() = Some(result);

        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        for waker in waiters {
            waker.wake();
        }

        let links = std::mem::take(&mut *self.links.borrow_mut());
        let Some(hub) = self.hub() else {
            return;
        };

        tracing::trace!(
            hub = hub.minimal_ident(),
            task = self.ident,
            failed = self.error.borrow().is_some(),
            "task finished"
        );

        for link in links {
            hub.schedule_link(link);
        }

        if let Some(err) = escalate {
            let _ = hub.handle_system_error(err);
        }
    }
}

impl<T> TaskControl for TaskCell<T> {
    fn mark_running(&self) {
        if self.state.get() == TaskState::Scheduled {
            self.state.set(TaskState::Running);
        }
    }

    fn fail(&self, error: Error) {
        self.complete(Err(error));
    }

    fn state(&self) -> TaskState {
        self.state.get()
    }

    fn ident(&self) -> u64 {
        self.ident
    }
}

impl<T> fmt::Debug for TaskCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCell")
            .field("ident", &self.ident)
            .field("id", &self.id.get())
            .field("state", &self.state.get())
            .finish()
    }
}

impl Hub {
    /// Runs a link of a finished task as a loop callback.
    pub(crate) fn schedule_link(&self, link: Box<dyn FnOnce()>) {
        if let Ok(reactor) = self.reactor() {
            reactor.run_callback(Callback::Call(Box::new(move || {
                link();
                Ok(())
            })));
        }
    }
}

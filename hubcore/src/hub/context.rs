use super::Hub;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::reactor::Reactor;
use crate::task::TaskId;
use crate::utils::slab::Key;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

thread_local! {
    /// The hub of the current thread, created lazily by [`get_hub`].
    pub(crate) static CURRENT_HUB: RefCell<Option<Hub>> = const { RefCell::new(None) };

    /// The task being polled, with the ident of the hub that owns it.
    static CURRENT_TASK: Cell<Option<(u64, TaskId)>> = const { Cell::new(None) };

    /// An error injected into the task being polled by a kill. The first
    /// hub primitive the task polls consumes it and fails with it.
    static PENDING_THROW: RefCell<Option<Error>> = const { RefCell::new(None) };

    /// Reactor left behind by a hub destroyed without its loop; the next
    /// hub created on this thread adopts it.
    static DETACHED_REACTOR: RefCell<Option<Rc<Reactor>>> = const { RefCell::new(None) };
}

/// Returns the hub of the current thread, creating it if needed.
///
/// The hub is built from [`Config::from_env`] and installed as the thread's
/// hub, so every later call returns the same instance until it is
/// destroyed.
///
/// # Errors
///
/// Returns an error if the environment configuration is invalid or the
/// loop cannot be created.
///
/// # Examples
///
/// ```rust,ignore
/// let hub = hubcore::get_hub()?;
/// hub.block_on(async { Ok(()) })?;
/// ```
pub fn get_hub() -> Result<Hub> {
    if let Some(hub) = get_hub_if_exists() {
        return Ok(hub);
    }

    let hub = Hub::new(Config::from_env()?)?;
    set_hub(Some(hub.clone()));
    Ok(hub)
}

/// Returns the hub of the current thread without creating one.
pub fn get_hub_if_exists() -> Option<Hub> {
    CURRENT_HUB
        .try_with(|current| current.borrow().clone())
        .ok()
        .flatten()
}

/// Installs `hub` as the current thread's hub, or clears it with `None`.
/// The previous hub, if any, is returned.
pub fn set_hub(hub: Option<Hub>) -> Option<Hub> {
    CURRENT_HUB
        .try_with(|current| current.replace(hub))
        .ok()
        .flatten()
}

/// Returns the task currently being run, if any.
pub fn current_task() -> Option<TaskId> {
    CURRENT_TASK.with(|c| c.get()).map(|(_, id)| id)
}

/// Returns the current task if it belongs to the hub `ident`.
pub(crate) fn current_task_of(ident: u64) -> Option<TaskId> {
    CURRENT_TASK
        .with(|c| c.get())
        .filter(|(hub, _)| *hub == ident)
        .map(|(_, id)| id)
}

/// Restores the previous current hub when dropped.
pub(crate) struct EnterGuard {
    previous: Option<Hub>,
}

/// Makes `hub` the current hub while its loop runs.
pub(crate) fn enter(hub: Hub) -> EnterGuard {
    EnterGuard {
        previous: set_hub(Some(hub)),
    }
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let replaced = set_hub(previous);
        drop(replaced);
    }
}

/// State saved around the poll of one task.
pub(crate) struct TaskScope {
    previous: Option<(u64, TaskId)>,
    previous_throw: Option<Error>,
}

/// Marks `id` of the hub `ident` as the running task, with `thrown` as the
/// error its next hub primitive must fail with.
pub(crate) fn enter_task(ident: u64, id: TaskId, thrown: Option<Error>) -> TaskScope {
    TaskScope {
        previous: CURRENT_TASK.with(|c| c.replace(Some((ident, id)))),
        previous_throw: PENDING_THROW.with(|t| t.replace(thrown)),
    }
}

impl TaskScope {
    /// Leaves the task and returns the thrown error if nothing consumed it.
    pub(crate) fn exit(self) -> Option<Error> {
        CURRENT_TASK.with(|c| c.set(self.previous));
        PENDING_THROW.with(|t| t.replace(self.previous_throw))
    }
}

/// Takes the error a kill injected into the running task.
///
/// Every primitive that suspends a task calls this first and fails with the
/// returned error.
pub(crate) fn take_throw() -> Option<Error> {
    PENDING_THROW
        .try_with(|t| t.borrow_mut().take())
        .ok()
        .flatten()
}

/// Reactor of the current hub.
pub(crate) fn current_reactor() -> Result<Rc<Reactor>> {
    let hub = get_hub_if_exists().ok_or(Error::BlockingSwitchOut(
        "hub primitives must be awaited inside a hub",
    ))?;
    hub.reactor()
}

/// Queues task `key` of hub `ident` on this thread if that hub is the
/// current one. Returns `false` when the wake must go through the hub's
/// remote queue instead.
pub(crate) fn schedule_local(ident: u64, key: Key) -> bool {
    CURRENT_HUB
        .try_with(|current| match current.try_borrow() {
            Ok(current) => match current.as_ref() {
                Some(hub) if hub.minimal_ident() == ident => hub.schedule(key),
                _ => false,
            },
            Err(_) => false,
        })
        .unwrap_or(false)
}

/// Clears the current hub if it is the hub `ident`.
pub(crate) fn clear_current(ident: u64) {
    let removed = CURRENT_HUB.try_with(|current| {
        let mut current = current.try_borrow_mut().ok()?;
        if current.as_ref().is_some_and(|hub| hub.minimal_ident() == ident) {
            current.take()
        } else {
            None
        }
    });
    drop(removed);
}

pub(crate) fn detach_reactor(reactor: Rc<Reactor>) {
    let _ = DETACHED_REACTOR.try_with(|slot| slot.replace(Some(reactor)));
}

pub(crate) fn take_detached_reactor() -> Option<Rc<Reactor>> {
    DETACHED_REACTOR
        .try_with(|slot| slot.borrow_mut().take())
        .ok()
        .flatten()
}

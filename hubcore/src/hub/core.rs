use super::context;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::monitor::{MonitorObserver, PeriodicMonitor, Probe};
use crate::reactor::{Callback, Reactor, Remote, TimerAction};
use crate::resolver::Resolver;
use crate::task::core::{TaskCell, TaskControl, TaskSlot};
use crate::task::waker::make_waker;
use crate::task::{TaskHandle, TaskId, TreeLocals};
use crate::threadpool::ThreadPool;
use crate::utils::Slab;
use crate::utils::slab::Key;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::io::Write;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::Waker;
use std::thread::{self, ThreadId};
use std::time::Duration;

static NEXT_HUB_IDENT: AtomicU64 = AtomicU64::new(1);

/// Pluggable parts of a hub, filled in by [`HubBuilder`](super::HubBuilder).
pub(crate) struct HubParts {
    pub(crate) threadpool: Option<Rc<dyn ThreadPool>>,
    pub(crate) resolver: Option<Rc<dyn Resolver>>,
    pub(crate) observer: Option<MonitorObserver>,
    pub(crate) exception_stream: Option<Box<dyn Write>>,
}

impl Default for HubParts {
    fn default() -> Self {
        Self {
            threadpool: None,
            resolver: None,
            observer: None,
            exception_stream: Some(Box::new(std::io::stderr())),
        }
    }
}

pub(crate) struct HubInner {
    pub(crate) ident: u64,
    pub(crate) thread: ThreadId,
    pub(crate) config: Config,

    /// `None` once the hub is destroyed.
    pub(crate) reactor: RefCell<Option<Rc<Reactor>>>,
    pub(crate) remote: Arc<Remote>,

    pub(crate) tasks: RefCell<Slab<TaskSlot>>,
    next_task_ident: Cell<u64>,

    pub(crate) threadpool: RefCell<Option<Rc<dyn ThreadPool>>>,
    pub(crate) resolver: RefCell<Option<Rc<dyn Resolver>>>,

    pub(crate) monitor: RefCell<Option<PeriodicMonitor>>,
    pub(crate) monitor_started: Cell<bool>,
    pub(crate) observer: Option<MonitorObserver>,
    pub(crate) probe: Arc<Probe>,

    pub(crate) exception_stream: RefCell<Option<Box<dyn Write>>>,

    pub(crate) running: Cell<bool>,
    pub(crate) destroyed: Cell<bool>,

    /// Destroy requested while running, with its `destroy_loop` argument.
    pub(crate) shutdown: Cell<Option<Option<bool>>>,

    /// System error waiting to be handed to the root.
    pub(crate) system_error: RefCell<Option<Error>>,
}

/// The scheduler of one OS thread.
///
/// A hub owns an event loop and the tasks running on it. Tasks only make
/// progress while the root context drives the loop through
/// [`block_on`](Hub::block_on) or [`join`](Hub::join); they switch to each
/// other at their await points.
///
/// `Hub` is a cheap reference-counted handle and is neither `Send` nor
/// `Sync`. Use [`remote`](Hub::remote) to reach it from another thread.
///
/// # Examples
///
/// ```rust,ignore
/// let hub = HubBuilder::new().build()?;
///
/// let value = hub.block_on(async {
///     let task = hubcore::spawn(async { Ok(21) })?;
///     Ok(task.await? * 2)
/// })?;
///
/// assert_eq!(value, 42);
/// hub.destroy(Some(true));
/// ```
#[derive(Clone)]
pub struct Hub {
    pub(crate) inner: Rc<HubInner>,
}

impl Hub {
    /// Creates a hub from `config` with the default thread pool, resolver
    /// and exception stream.
    ///
    /// The hub is not installed as the current thread's hub; see
    /// [`set_hub`](crate::set_hub) and [`HubBuilder::install`](super::HubBuilder::install).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid configuration or the OS
    /// error of creating the event loop.
    pub fn new(config: Config) -> Result<Hub> {
        Hub::with_parts(config, HubParts::default())
    }

    pub(crate) fn with_parts(config: Config, parts: HubParts) -> Result<Hub> {
        config.validate()?;

        let reactor = match context::take_detached_reactor() {
            Some(reactor) => reactor,
            None => Rc::new(Reactor::new(is_main_thread())?),
        };
        let remote = reactor.remote().clone();
        let ident = NEXT_HUB_IDENT.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            hub = ident,
            default_loop = reactor.is_default(),
            "hub created"
        );

        Ok(Hub {
            inner: Rc::new(HubInner {
                ident,
                thread: thread::current().id(),
                config,
                reactor: RefCell::new(Some(reactor)),
                remote,
                tasks: RefCell::new(Slab::new()),
                next_task_ident: Cell::new(1),
                threadpool: RefCell::new(parts.threadpool),
                resolver: RefCell::new(parts.resolver),
                monitor: RefCell::new(None),
                monitor_started: Cell::new(false),
                observer: parts.observer,
                probe: Arc::new(Probe::default()),
                exception_stream: RefCell::new(parts.exception_stream),
                running: Cell::new(false),
                destroyed: Cell::new(false),
                shutdown: Cell::new(None),
                system_error: RefCell::new(None),
            }),
        })
    }

    pub(crate) fn from_inner(inner: Rc<HubInner>) -> Hub {
        Hub { inner }
    }

    /// Process-wide unique number of this hub, starting at 1.
    pub fn minimal_ident(&self) -> u64 {
        self.inner.ident
    }

    /// The thread owning this hub.
    pub fn thread_ident(&self) -> ThreadId {
        self.inner.thread
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Whether the root context is currently driving the loop.
    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    /// Returns `true` if both handles designate the same hub.
    pub fn ptr_eq(&self, other: &Hub) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn reactor(&self) -> Result<Rc<Reactor>> {
        self.inner
            .reactor
            .borrow()
            .clone()
            .ok_or(Error::HubDestroyed)
    }

    /// Queues task `key` if the reactor is reachable without conflict.
    pub(crate) fn schedule(&self, key: Key) -> bool {
        match self.inner.reactor.try_borrow() {
            Ok(reactor) => match reactor.as_ref() {
                Some(reactor) => {
                    reactor.run_callback(Callback::Poll(key));
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    /// Queues `f` to run on the loop after the callbacks already queued.
    ///
    /// An error returned by `f`, or a panic, is reported through
    /// [`handle_error`](Hub::handle_error) with the context `"callback"`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HubDestroyed`] if the hub was destroyed.
    pub fn run_callback<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + 'static,
    {
        self.reactor()?.run_callback(Callback::Call(Box::new(f)));
        Ok(())
    }

    // ----- tasks -----------------------------------------------------------

    /// Spawns `future` as a new task of this hub.
    ///
    /// The task is only queued: it first runs when the loop reaches it,
    /// never synchronously within this call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HubDestroyed`] if the hub was destroyed.
    pub fn spawn<F, T>(&self, future: F) -> Result<TaskHandle<T>>
    where
        F: Future<Output = Result<T>> + 'static,
        T: 'static,
    {
        let reactor = self.reactor()?;
        let handle = self.insert_task(future)?;
        reactor.run_callback(Callback::Poll(handle.id().0));
        Ok(handle)
    }

    /// Spawns `future` as a task starting `delay` from now.
    ///
    /// The start timer keeps the loop alive. Killing the task before it
    /// started releases the timer and the future is never polled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HubDestroyed`] if the hub was destroyed.
    pub fn spawn_later<F, T>(&self, delay: Duration, future: F) -> Result<TaskHandle<T>>
    where
        F: Future<Output = Result<T>> + 'static,
        T: 'static,
    {
        let reactor = self.reactor()?;
        let handle = self.insert_task(future)?;
        let key = handle.id().0;
        let weak = Rc::downgrade(&self.inner);

        reactor.update_now();
        let timer = reactor.add_timer(
            delay,
            true,
            TimerAction::Call(Box::new(move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if let Some(slot) = inner.tasks.borrow_mut().get_mut(key) {
                    slot.start_timer = None;
                }
                Hub::from_inner(inner).schedule(key);
            })),
        );

        if let Some(slot) = self.inner.tasks.borrow_mut().get_mut(key) {
            slot.start_timer = Some(timer);
        }
        Ok(handle)
    }

    fn insert_task<F, T>(&self, future: F) -> Result<TaskHandle<T>>
    where
        F: Future<Output = Result<T>> + 'static,
        T: 'static,
    {
        if self.is_destroyed() {
            return Err(Error::HubDestroyed);
        }

        let ident = self.inner.next_task_ident.get();
        self.inner.next_task_ident.set(ident + 1);

        let (spawner, locals) = if self.inner.config.track_task_tree {
            let spawner = context::current_task_of(self.inner.ident);
            let inherited = spawner.and_then(|id| {
                self.inner
                    .tasks
                    .borrow()
                    .get(id.0)
                    .and_then(|slot| slot.locals.clone())
            });
            (spawner, Some(inherited.unwrap_or_else(TreeLocals::new)))
        } else {
            (None, None)
        };

        let cell = Rc::new(TaskCell::new(
            ident,
            Rc::downgrade(&self.inner),
            spawner,
            locals.clone(),
        ));
        let completion = cell.clone();
        let wrapped = async move {
            let result = future.await;
            completion.complete(result);
        };
        let control: Rc<dyn TaskControl> = cell.clone();

        let key = {
            let mut tasks = self.inner.tasks.borrow_mut();
            let key = tasks.insert(TaskSlot {
                future: Some(Box::pin(wrapped)),
                control,
                waker: Waker::noop().clone(),
                started: false,
                thrown: None,
                start_timer: None,
                spawner,
                locals,
            });
            if let Some(slot) = tasks.get_mut(key) {
                slot.waker = make_waker(self.inner.remote.clone(), self.inner.ident, key);
            }
            key
        };

        let id = TaskId(key);
        cell.set_id(id);
        tracing::trace!(hub = self.inner.ident, task = ident, %id, "task spawned");

        Ok(TaskHandle::new(id, cell))
    }

    /// Kills the task `id` of this hub with `error`. See
    /// [`TaskHandle::kill`].
    pub(crate) fn kill_task(&self, id: TaskId, error: Error) {
        let unstarted = {
            let mut tasks = self.inner.tasks.borrow_mut();
            let Some(slot) = tasks.get_mut(id.0) else {
                return;
            };
            if slot.started {
                slot.thrown = Some(error);
                None
            } else {
                tasks.remove(id.0).map(|slot| (slot, error))
            }
        };

        match unstarted {
            None => {
                self.schedule(id.0);
            }
            Some((slot, error)) => {
                if let (Some(timer), Ok(reactor)) = (slot.start_timer, self.reactor()) {
                    reactor.cancel_timer(timer);
                }
                let control = slot.control.clone();
                drop(slot);
                control.fail(error);
            }
        }
    }

    /// Drops task `id` without resuming it and fails it with `error`.
    pub(crate) fn discard_task(&self, id: TaskId, error: Error) {
        let slot = self.inner.tasks.borrow_mut().remove(id.0);
        let Some(mut slot) = slot else {
            return;
        };

        if let (Some(timer), Ok(reactor)) = (slot.start_timer, self.reactor()) {
            reactor.cancel_timer(timer);
        }
        let future = slot.future.take();
        drop(future);
        slot.control.fail(error);
    }

    /// Number of tasks that have not finished.
    pub fn live_tasks(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    // ----- introspection ---------------------------------------------------

    pub fn stats(&self) -> HubStats {
        let mut stats = HubStats {
            live_tasks: self.live_tasks(),
            ..HubStats::default()
        };

        if let Ok(reactor) = self.reactor() {
            let r = reactor.stats();
            stats.pending_callbacks = r.pending_callbacks;
            stats.active_timers = r.active_timers;
            stats.referenced_timers = r.referenced_timers;
            stats.io_watchers = r.io_watchers;
            stats.idle_watchers = r.idle_watchers;
            stats.signal_watchers = r.signal_watchers;
            stats.pending_remote = r.pending_remote;
        }

        stats
    }

    /// Human-readable description of the hub and its live tasks, one line
    /// per entry.
    pub fn format_run_info(&self) -> Vec<String> {
        let stats = self.stats();
        let mut lines = vec![
            format!(
                "Hub {} on {:?}: running={} destroyed={}",
                self.inner.ident,
                self.inner.thread,
                self.is_running(),
                self.is_destroyed()
            ),
            format!(
                "  loop: callbacks={} timers={} (referenced {}) io={} idle={} signals={} remote={}",
                stats.pending_callbacks,
                stats.active_timers,
                stats.referenced_timers,
                stats.io_watchers,
                stats.idle_watchers,
                stats.signal_watchers,
                stats.pending_remote
            ),
        ];

        let tasks = self.inner.tasks.borrow();
        for (key, slot) in tasks.iter() {
            let mut line = format!(
                "  task {} ({}) {:?}",
                slot.control.ident(),
                TaskId(key),
                slot.control.state()
            );
            if let Some(spawner) = slot.spawner {
                line.push_str(&format!(" spawned by {spawner}"));
            }
            if slot.thrown.is_some() {
                line.push_str(" (kill pending)");
            }
            lines.push(line);
        }

        lines
    }

    /// Starts the watchdog if configured and not started yet.
    pub(crate) fn start_monitor(&self) -> Result<()> {
        if !self.inner.config.monitor_thread || self.inner.monitor_started.get() {
            return Ok(());
        }

        let monitor = PeriodicMonitor::start(
            self.inner.ident,
            &self.inner.config,
            self.inner.probe.clone(),
            self.inner.observer.clone(),
            is_main_thread(),
        )?;

        *self.inner.monitor.borrow_mut() = Some(monitor);
        self.inner.monitor_started.set(true);
        Ok(())
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("ident", &self.inner.ident)
            .field("thread", &self.inner.thread)
            .field("running", &self.inner.running.get())
            .field("destroyed", &self.inner.destroyed.get())
            .field("tasks", &self.inner.tasks.borrow().len())
            .finish()
    }
}

/// Counters describing a hub's loop and tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub live_tasks: usize,
    pub pending_callbacks: usize,
    pub active_timers: usize,
    pub referenced_timers: usize,
    pub io_watchers: usize,
    pub idle_watchers: usize,
    pub signal_watchers: usize,
    pub pending_remote: usize,
}

/// Whether the caller is the process's initial thread.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn is_main_thread() -> bool {
    let tid = unsafe { libc::syscall(libc::SYS_gettid) } as libc::pid_t;
    tid == unsafe { libc::getpid() }
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
pub(crate) fn is_main_thread() -> bool {
    unsafe { libc::pthread_main_np() == 1 }
}

/// Unknown platforms never get the default reactor.
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd"
)))]
pub(crate) fn is_main_thread() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_named_main_is_not_the_main_thread() {
        let named = thread::Builder::new()
            .name("main".into())
            .spawn(is_main_thread)
            .expect("spawn")
            .join()
            .expect("join");
        assert!(!named);

        let hub = thread::Builder::new()
            .name("main".into())
            .spawn(|| {
                let hub = Hub::new(Config::default()).expect("hub");
                let default = hub.reactor().expect("reactor").is_default();
                hub.destroy(Some(true));
                default
            })
            .expect("spawn")
            .join()
            .expect("join");
        assert!(!hub, "a secondary thread must not own the default reactor");
    }
}

use super::command::Remote;
use super::event::Event;
use super::io::{Direction, IoWatchers};
use super::poller::Poller;
use super::poller::unix::sys_getpid;
use super::signal;
use super::timer::{TimerAction, TimerEntry, TimerSlot};
use crate::error::{Error, Result};
use crate::utils::Slab;
use crate::utils::slab::Key;

use std::cell::{Cell, RefCell};
use std::collections::{BinaryHeap, VecDeque};
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::sync::Arc;
use std::task::Waker;
use std::time::{Duration, Instant};

/// A unit of work in the loop's callback queue.
pub(crate) enum Callback {
    /// Start or resume a task of the owning hub.
    Poll(Key),
    /// Run a closure; an error is reported through the hub's error path.
    Call(Box<dyn FnOnce() -> Result<()>>),
}

#[derive(Default)]
struct Timers {
    heap: BinaryHeap<TimerEntry>,
    slots: Slab<TimerSlot>,
    seq: u64,
    /// Live timers with `keep_alive` set.
    referenced: usize,
}

struct IdleSlot {
    priority: i32,
    waker: Waker,
    fired: bool,
}

struct SignalSlot {
    signum: i32,
    callback: Rc<dyn Fn()>,
}

#[derive(Default)]
struct SignalWatchers {
    slots: Slab<SignalSlot>,
    /// Process-wide pending slot, claimed with the first watcher.
    slot: Option<usize>,
}

/// The event loop of one hub.
///
/// The reactor is single-threaded: every method takes `&self` and relies on
/// short-lived `RefCell` borrows, so callbacks and wakers may re-enter it
/// freely. Nothing here runs user code while a borrow is held.
///
/// It owns:
/// - the FIFO callback queue,
/// - a min-heap of timers,
/// - descriptor, idle and signal watchers,
/// - the platform poller and the thread-safe [`Remote`].
pub(crate) struct Reactor {
    /// Created on the process's main thread; survives `destroy(None)`.
    default: bool,

    /// Process the poller belongs to.
    pid: Cell<u32>,

    poller: RefCell<Poller>,
    remote: Arc<Remote>,

    /// Cached loop time, refreshed once per iteration and before arming a
    /// timer.
    now: Cell<Instant>,

    callbacks: RefCell<VecDeque<Callback>>,
    timers: RefCell<Timers>,
    io: RefCell<IoWatchers>,
    idles: RefCell<Slab<IdleSlot>>,
    signals: RefCell<SignalWatchers>,
    events: RefCell<Vec<Event>>,
}

impl Reactor {
    pub(crate) fn new(default: bool) -> io::Result<Self> {
        let poller = Poller::new()?;
        let remote = Arc::new(Remote::new(poller.wake_fd()));

        Ok(Self {
            default,
            pid: Cell::new(sys_getpid()),
            poller: RefCell::new(poller),
            remote,
            now: Cell::new(Instant::now()),
            callbacks: RefCell::new(VecDeque::new()),
            timers: RefCell::new(Timers::default()),
            io: RefCell::new(IoWatchers::default()),
            idles: RefCell::new(Slab::new()),
            signals: RefCell::new(SignalWatchers::default()),
            events: RefCell::new(Vec::with_capacity(64)),
        })
    }

    pub(crate) fn is_default(&self) -> bool {
        self.default
    }

    pub(crate) fn remote(&self) -> &Arc<Remote> {
        &self.remote
    }

    pub(crate) fn update_now(&self) {
        self.now.set(Instant::now());
    }

    // ----- callbacks -------------------------------------------------------

    pub(crate) fn run_callback(&self, callback: Callback) {
        self.callbacks.borrow_mut().push_back(callback);
    }

    /// Takes the batch of callbacks to run in this iteration. Callbacks
    /// queued while the batch runs belong to the next iteration.
    pub(crate) fn take_callbacks(&self) -> VecDeque<Callback> {
        std::mem::take(&mut *self.callbacks.borrow_mut())
    }

    /// Puts the unprocessed rest of a batch back in front of the queue.
    pub(crate) fn requeue_front(&self, mut rest: VecDeque<Callback>) {
        let mut callbacks = self.callbacks.borrow_mut();
        rest.append(&mut callbacks);
        *callbacks = rest;
    }

    pub(crate) fn has_callbacks(&self) -> bool {
        !self.callbacks.borrow().is_empty()
    }

    // ----- timers ----------------------------------------------------------

    /// Arms a timer `delay` after the cached loop time.
    pub(crate) fn add_timer(&self, delay: Duration, keep_alive: bool, action: TimerAction) -> Key {
        let deadline = self.now.get() + delay;
        let mut timers = self.timers.borrow_mut();

        let key = timers.slots.insert(TimerSlot { action, keep_alive });
        let seq = timers.seq;
        timers.seq += 1;
        if keep_alive {
            timers.referenced += 1;
        }
        timers.heap.push(TimerEntry { deadline, seq, key });

        key
    }

    /// Whether the timer `key` is still armed. A fired or cancelled timer
    /// is never active again.
    pub(crate) fn timer_active(&self, key: Key) -> bool {
        self.timers.borrow().slots.contains(key)
    }

    pub(crate) fn set_timer_waker(&self, key: Key, waker: &Waker) {
        let mut timers = self.timers.borrow_mut();
        if let Some(slot) = timers.slots.get_mut(key) {
            match &mut slot.action {
                TimerAction::Wake(w) if !w.will_wake(waker) => *w = waker.clone(),
                _ => {}
            }
        }
    }

    /// Disarms the timer `key`. Returns `false` if it already fired or was
    /// cancelled, so a timer is released exactly once.
    pub(crate) fn cancel_timer(&self, key: Key) -> bool {
        let slot = {
            let mut timers = self.timers.borrow_mut();
            let slot = timers.slots.remove(key);
            if slot.as_ref().is_some_and(|s| s.keep_alive) {
                timers.referenced -= 1;
            }
            slot
        };

        slot.is_some()
    }

    /// Time until the earliest live timer, dropping stale heap entries.
    pub(crate) fn next_timeout(&self) -> Option<Duration> {
        let mut timers = self.timers.borrow_mut();

        loop {
            let top = timers.heap.peek()?;
            if timers.slots.contains(top.key) {
                return Some(top.deadline.saturating_duration_since(self.now.get()));
            }
            timers.heap.pop();
        }
    }

    /// Fires every timer whose deadline is at or before the cached time.
    pub(crate) fn fire_timers(&self) {
        let now = self.now.get();

        loop {
            let slot = {
                let mut timers = self.timers.borrow_mut();

                let Some(top) = timers.heap.peek() else {
                    break;
                };
                if top.deadline > now {
                    break;
                }

                let Some(entry) = timers.heap.pop() else {
                    break;
                };
                let Some(slot) = timers.slots.remove(entry.key) else {
                    continue;
                };
                if slot.keep_alive {
                    timers.referenced -= 1;
                }
                slot
            };

            match slot.action {
                TimerAction::Wake(waker) => waker.wake(),
                TimerAction::Call(f) => self.run_callback(Callback::Call(Box::new(move || {
                    f();
                    Ok(())
                }))),
            }
        }
    }

    // ----- descriptors -----------------------------------------------------

    pub(crate) fn add_io(&self, fd: RawFd, dir: Direction, waker: Waker) -> Result<Key> {
        let mut poller = self.poller.borrow_mut();
        self.io.borrow_mut().add(&mut poller, fd, dir, waker)
    }

    pub(crate) fn io_fired(&self, key: Key, dir: Direction) -> bool {
        self.io.borrow().fired(key, dir)
    }

    pub(crate) fn set_io_waker(&self, key: Key, dir: Direction, waker: &Waker) {
        self.io.borrow_mut().set_waker(key, dir, waker);
    }

    pub(crate) fn remove_io(&self, key: Key, dir: Direction) {
        let mut poller = self.poller.borrow_mut();
        self.io.borrow_mut().remove(&mut poller, key, dir);
    }

    // ----- idle watchers ---------------------------------------------------

    pub(crate) fn add_idle(&self, priority: i32, waker: Waker) -> Key {
        self.idles.borrow_mut().insert(IdleSlot {
            priority,
            waker,
            fired: false,
        })
    }

    pub(crate) fn idle_fired(&self, key: Key) -> bool {
        self.idles.borrow().get(key).is_some_and(|slot| slot.fired)
    }

    pub(crate) fn set_idle_waker(&self, key: Key, waker: &Waker) {
        if let Some(slot) = self.idles.borrow_mut().get_mut(key) {
            if !slot.waker.will_wake(waker) {
                slot.waker = waker.clone();
            }
        }
    }

    pub(crate) fn remove_idle(&self, key: Key) {
        self.idles.borrow_mut().remove(key);
    }

    fn has_pending_idle(&self) -> bool {
        self.idles.borrow().iter().any(|(_, slot)| !slot.fired)
    }

    /// Fires the unfired idle watchers of the highest pending priority.
    pub(crate) fn fire_idles(&self) {
        let wakers: Vec<Waker> = {
            let mut idles = self.idles.borrow_mut();

            let Some(top) = idles
                .iter()
                .filter(|(_, slot)| !slot.fired)
                .map(|(_, slot)| slot.priority)
                .max()
            else {
                return;
            };

            idles
                .iter_mut()
                .filter(|(_, slot)| !slot.fired && slot.priority == top)
                .map(|(_, slot)| {
                    slot.fired = true;
                    slot.waker.clone()
                })
                .collect()
        };

        for waker in wakers {
            waker.wake();
        }
    }

    // ----- signals ---------------------------------------------------------

    pub(crate) fn add_signal(&self, signum: i32, callback: Rc<dyn Fn()>) -> Result<Key> {
        signal::validate(signum)?;

        let mut signals = self.signals.borrow_mut();

        if signals.slot.is_none() {
            let wake_fd = self.poller.borrow().wake_fd();
            let slot = signal::claim_slot(wake_fd).ok_or_else(|| {
                Error::other(format!(
                    "at most {} hubs may watch signals at once",
                    signal::SLOTS
                ))
            })?;
            signals.slot = Some(slot);
        }

        signal::install(signum)?;
        Ok(signals.slots.insert(SignalSlot { signum, callback }))
    }

    /// Stops the signal watcher `key`. Idempotent.
    pub(crate) fn remove_signal(&self, key: Key) {
        let removed = self.signals.borrow_mut().slots.remove(key);
        if let Some(slot) = removed {
            signal::uninstall(slot.signum);
        }
    }

    /// Runs the watchers of every signal delivered since the last call.
    pub(crate) fn dispatch_signals(&self) {
        let callbacks: Vec<Rc<dyn Fn()>> = {
            let signals = self.signals.borrow();

            let Some(slot) = signals.slot else {
                return;
            };
            let mask = signal::take_pending(slot);
            if mask == 0 {
                return;
            }

            signals
                .slots
                .iter()
                .filter(|(_, s)| signal::is_set(mask, s.signum))
                .map(|(_, s)| s.callback.clone())
                .collect()
        };

        for callback in callbacks {
            callback();
        }
    }

    fn clear_signals(&self) {
        let mut signals = self.signals.borrow_mut();

        for slot in signals.slots.drain() {
            signal::uninstall(slot.signum);
        }
        if let Some(slot) = signals.slot.take() {
            signal::release_slot(slot);
        }
    }

    // ----- loop ------------------------------------------------------------

    /// Whether anything still keeps the loop alive: queued callbacks,
    /// referenced timers, descriptor watchers, unfired idle watchers or
    /// cross-thread work. Unreferenced timers and signal watchers do not
    /// count.
    pub(crate) fn is_alive(&self) -> bool {
        self.has_callbacks()
            || self.timers.borrow().referenced > 0
            || self.io.borrow().len() > 0
            || self.has_pending_idle()
            || self.remote.has_work()
    }

    /// How long the next poll may block.
    pub(crate) fn poll_timeout(&self) -> Option<Duration> {
        if self.has_callbacks() || self.remote.has_commands() || self.has_pending_idle() {
            return Some(Duration::ZERO);
        }
        self.next_timeout()
    }

    /// Waits for readiness, wake-ups or the timeout, then refreshes the
    /// loop time and wakes the descriptor watchers that became ready.
    pub(crate) fn poll(&self, timeout: Option<Duration>) -> io::Result<()> {
        let wakers = {
            let mut poller = self.poller.borrow_mut();
            let mut events = self.events.borrow_mut();

            poller.poll(&mut events, timeout)?;
            self.update_now();

            if events.is_empty() {
                Vec::new()
            } else {
                self.io.borrow_mut().dispatch(&mut poller, &events)
            }
        };

        for waker in wakers {
            waker.wake();
        }

        Ok(())
    }

    /// Rebuilds the poller if the process forked since it was created.
    /// Returns whether anything changed; calling it again is a no-op.
    pub(crate) fn reinit(&self) -> io::Result<bool> {
        let pid = sys_getpid();
        if pid == self.pid.get() {
            return Ok(false);
        }

        let mut fresh = Poller::new()?;
        self.io.borrow().register_all(&mut fresh)?;

        let wake_fd = fresh.wake_fd();
        *self.poller.borrow_mut() = fresh;

        self.remote.set_wake_fd(wake_fd);
        if let Some(slot) = self.signals.borrow().slot {
            signal::update_slot(slot, wake_fd);
        }

        self.pid.set(pid);
        Ok(true)
    }

    /// Drops every callback and watcher. The reactor stays usable, which is
    /// what a detached reactor needs before the next hub adopts it.
    pub(crate) fn reset(&self) {
        let callbacks = self.take_callbacks();
        drop(callbacks);

        let timers = std::mem::take(&mut *self.timers.borrow_mut());
        drop(timers);

        {
            let mut poller = self.poller.borrow_mut();
            self.io.borrow_mut().clear(&mut poller);
        }

        let idles = self.idles.borrow_mut().drain();
        drop(idles);

        self.clear_signals();
        self.remote.take();
    }

    pub(crate) fn stats(&self) -> ReactorStats {
        let timers = self.timers.borrow();
        ReactorStats {
            pending_callbacks: self.callbacks.borrow().len(),
            active_timers: timers.slots.len(),
            referenced_timers: timers.referenced,
            io_watchers: self.io.borrow().len(),
            idle_watchers: self.idles.borrow().len(),
            signal_watchers: self.signals.borrow().slots.len(),
            pending_remote: self.remote.pending(),
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.clear_signals();
        self.remote.set_wake_fd(-1);
    }
}

/// Counters of the reactor's queues and watchers.
pub(crate) struct ReactorStats {
    pub(crate) pending_callbacks: usize,
    pub(crate) active_timers: usize,
    pub(crate) referenced_timers: usize,
    pub(crate) io_watchers: usize,
    pub(crate) idle_watchers: usize,
    pub(crate) signal_watchers: usize,
    pub(crate) pending_remote: usize,
}

use crate::reactor::poller::notify;
use crate::utils::slab::Key;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

/// Work handed to a hub from another thread.
pub(crate) enum Command {
    /// Resume the task `key` of the hub `hub`.
    Wake { hub: u64, key: Key },
    /// Run a closure on the hub's thread as a loop callback.
    Call(Box<dyn FnOnce() + Send>),
    /// Tear the hub `hub` down at the next iteration.
    Destroy { hub: u64 },
}

/// The thread-safe side of a reactor.
///
/// Wakers, thread pool jobs and [`RemoteHandle`](crate::RemoteHandle)s hold
/// an `Arc<Remote>`. Sending a command appends it to the queue and
/// interrupts the poller through its wake descriptor.
pub(crate) struct Remote {
    commands: Mutex<Vec<Command>>,

    /// Descriptor written to interrupt the poller; `-1` once the reactor
    /// is gone.
    wake_fd: AtomicI32,

    /// Cross-thread operations still in flight. Each one keeps the loop
    /// alive until it completes.
    pending: AtomicUsize,
}

impl Remote {
    pub(crate) fn new(wake_fd: i32) -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            wake_fd: AtomicI32::new(wake_fd),
            pending: AtomicUsize::new(0),
        }
    }

    /// Queues `command` and wakes the poller.
    pub(crate) fn send(&self, command: Command) {
        self.commands.lock().push(command);
        self.notify();
    }

    pub(crate) fn notify(&self) {
        let fd = self.wake_fd.load(Ordering::Acquire);
        if fd >= 0 {
            notify(fd);
        }
    }

    pub(crate) fn take(&self) -> Vec<Command> {
        std::mem::take(&mut *self.commands.lock())
    }

    pub(crate) fn has_commands(&self) -> bool {
        !self.commands.lock().is_empty()
    }

    /// Whether a command is queued or an operation is still in flight.
    pub(crate) fn has_work(&self) -> bool {
        self.pending.load(Ordering::Acquire) > 0 || self.has_commands()
    }

    /// Marks one cross-thread operation as started.
    pub(crate) fn hold(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Marks one cross-thread operation as finished. Must come after the
    /// completion was queued, so the loop never sees neither.
    pub(crate) fn release(&self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
        self.notify();
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub(crate) fn set_wake_fd(&self, fd: i32) {
        self.wake_fd.store(fd, Ordering::Release);
    }
}

use crate::hub::context;
use crate::reactor::{Command, Remote};
use crate::utils::slab::Key;

use std::sync::Arc;
use std::task::{Wake, Waker};

/// Waker of one task of one hub.
///
/// Waking on the hub's own thread while the hub is current queues the task
/// directly, in order with the other loop callbacks. From anywhere else the
/// wake goes through the hub's [`Remote`] and interrupts its poller.
struct TaskWaker {
    hub: u64,
    key: Key,
    remote: Arc<Remote>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if !context::schedule_local(self.hub, self.key) {
            self.remote.send(Command::Wake {
                hub: self.hub,
                key: self.key,
            });
        }
    }
}

/// Creates the waker of task `key` of the hub `hub`.
pub(crate) fn make_waker(remote: Arc<Remote>, hub: u64, key: Key) -> Waker {
    Waker::from(Arc::new(TaskWaker { hub, key, remote }))
}
